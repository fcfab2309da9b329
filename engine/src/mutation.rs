use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, RngCore};

use crate::genome::{symmetric, Genotype, Innovation};
use crate::graph::NodeId;
use crate::pool::{GenotypeId, PoolConfig};

// Perturbation ranges for the shift branch of weight and bias mutation
const WEIGHT_SHIFT_RANGE: f64 = 0.1;
const BIAS_SHIFT_RANGE: f64 = 0.05;

/// Structural mutations proposed across a generation, deduplicated by their
/// structural identity.
///
/// Splits are keyed by the target innovation and grows by the `(start, end)`
/// pair, so the same mutation arising independently in different lineages is
/// applied with the same fresh node id and innovation numbers. That keeps
/// homologous structure historically identical instead of drifting into
/// spurious incompatibility.
#[derive(Debug, Default)]
pub(crate) struct StructuralProposals {
    pub splits: BTreeMap<Innovation, Vec<GenotypeId>>,
    pub grows: BTreeMap<(NodeId, NodeId), Vec<GenotypeId>>,
}

/// Roll grow/split proposals independently for every non-champion genome.
/// A failed connectable-neuron search simply skips that genome's grow this
/// generation.
pub(crate) fn propose_structural(
    genotypes: &BTreeMap<GenotypeId, Genotype>,
    champions: &BTreeSet<GenotypeId>,
    config: &PoolConfig,
    rng: &mut dyn RngCore,
) -> StructuralProposals {
    let mut proposals = StructuralProposals::default();

    for (&genotype_id, genotype) in genotypes {
        if champions.contains(&genotype_id) {
            continue;
        }

        let grow_roll = rng.gen_range(0.0..1.0);
        let split_roll = rng.gen_range(0.0..1.0);

        if grow_roll <= config.grow_synapse_probability {
            match genotype.find_connectable_neurons(config.num_inputs, rng) {
                Some(pair) => proposals.grows.entry(pair).or_default().push(genotype_id),
                None => log::debug!("genotype {genotype_id} found no connectable neurons"),
            }
        }

        if split_roll <= config.split_synapse_probability {
            let target = genotype.find_splittable_synapse(rng);
            proposals
                .splits
                .entry(target)
                .or_default()
                .push(genotype_id);
        }
    }

    proposals
}

/// Per-gene weight mutation: usually a small symmetric shift, occasionally a
/// full re-roll.
pub(crate) fn mutate_weights(genotype: &mut Genotype, config: &PoolConfig, rng: &mut dyn RngCore) {
    let innovations: Vec<Innovation> = genotype.synapse_genes().keys().copied().collect();
    for innovation in innovations {
        if rng.gen_range(0.0..1.0) > config.mutate_synapse_weight_probability {
            continue;
        }
        let old = genotype.synapse_genes()[&innovation].weight;
        let weight = if rng.gen_range(0.0..1.0) <= config.shift_synapse_weight_probability {
            old + symmetric(rng, WEIGHT_SHIFT_RANGE)
        } else {
            Genotype::random_weight(rng)
        };
        genotype.set_synapse_weight(innovation, weight);
    }
}

/// Per-node bias mutation, analogous to the weight pass.
pub(crate) fn mutate_biases(genotype: &mut Genotype, config: &PoolConfig, rng: &mut dyn RngCore) {
    let node_ids: Vec<NodeId> = genotype.neuron_genes().keys().copied().collect();
    for node_id in node_ids {
        if rng.gen_range(0.0..1.0) > config.mutate_neuron_bias_probability {
            continue;
        }
        let old = genotype.neuron_genes()[&node_id];
        let bias = if rng.gen_range(0.0..1.0) <= config.shift_neuron_bias_probability {
            old + symmetric(rng, BIAS_SHIFT_RANGE)
        } else {
            Genotype::random_bias(rng)
        };
        genotype.set_neuron_bias(node_id, bias);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn always_mutate_config() -> PoolConfig {
        let mut config = PoolConfig::new(4, 1, 1);
        config.grow_synapse_probability = 1.0;
        config.split_synapse_probability = 1.0;
        config.mutate_synapse_weight_probability = 1.0;
        config.shift_synapse_weight_probability = 1.0;
        config.mutate_neuron_bias_probability = 1.0;
        config.shift_neuron_bias_probability = 1.0;
        config
    }

    #[test]
    fn identical_proposals_share_one_entry() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let config = always_mutate_config();

        // single-gene genomes can only propose splitting innovation 1
        let mut genotypes = BTreeMap::new();
        for id in 0..4u64 {
            genotypes.insert(id, Genotype::new(1, 1, &mut rng));
        }
        let champions = BTreeSet::new();

        let proposals = propose_structural(&genotypes, &champions, &config, &mut rng);
        assert_eq!(proposals.splits.len(), 1);
        assert_eq!(proposals.splits[&1].len(), 4);
        // the minimal genome has no room to grow
        assert!(proposals.grows.is_empty());
    }

    #[test]
    fn champions_are_exempt_from_proposals() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let config = always_mutate_config();

        let mut genotypes = BTreeMap::new();
        for id in 0..3u64 {
            genotypes.insert(id, Genotype::new(1, 1, &mut rng));
        }
        let champions = BTreeSet::from([1u64]);

        let proposals = propose_structural(&genotypes, &champions, &config, &mut rng);
        assert_eq!(proposals.splits[&1], vec![0, 2]);
    }

    #[test]
    fn shift_mutation_moves_weights_by_small_deltas() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let config = always_mutate_config();
        let mut genotype = Genotype::default();
        genotype.add_neuron_gene(-1, 0.0);
        genotype.add_neuron_gene(0, 1.0);
        genotype.add_synapse_gene(1, 0.5, -1, 0);

        mutate_weights(&mut genotype, &config, &mut rng);
        mutate_biases(&mut genotype, &config, &mut rng);

        let weight = genotype.synapse_genes()[&1].weight;
        assert!(weight != 0.5);
        assert!((weight - 0.5).abs() < WEIGHT_SHIFT_RANGE);
        let bias = genotype.neuron_genes()[&0];
        assert!(bias != 1.0);
        assert!((bias - 1.0).abs() < BIAS_SHIFT_RANGE);
    }

    #[test]
    fn replace_branch_rerolls_the_weight() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut config = always_mutate_config();
        config.shift_synapse_weight_probability = 0.0;
        let mut genotype = Genotype::default();
        genotype.add_neuron_gene(-1, 0.0);
        genotype.add_neuron_gene(0, 0.0);
        genotype.add_synapse_gene(1, 10.0, -1, 0);

        mutate_weights(&mut genotype, &config, &mut rng);
        // re-rolled weights live inside the random parameter range
        assert!(genotype.synapse_genes()[&1].weight.abs() < 2.0);
    }
}
