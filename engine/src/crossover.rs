use rand::{Rng, RngCore};

use crate::genome::{Genotype, Innovation, SynapseGene};

/// Chance that an inherited gene has its enabled flag forced back on. Genes
/// disabled in one lineage get a shot at transmitting signal again.
const REENABLE_PROBABILITY: f64 = 0.25;

/// Sexual recombination of two genomes aligned by innovation number.
///
/// The parent with the higher latest innovation is the *derived* genome, the
/// other the *basal* one; which of the two is fitter is independent of that.
/// Within the basal genome's innovation range, matching genes are inherited
/// 50/50 from either parent and disjoint genes only from the fitter parent.
/// Beyond that range, excess genes are inherited only when the derived parent
/// is also the fitter one. The offspring's gene set therefore always equals
/// the fitter parent's, so node order and biases transfer from it verbatim.
pub fn crossover(fitter: &Genotype, weaker: &Genotype, rng: &mut dyn RngCore) -> Genotype {
    let (derived, basal, derived_is_fitter) =
        if fitter.latest_innovation() > weaker.latest_innovation() {
            (fitter, weaker, true)
        } else {
            (weaker, fitter, false)
        };
    let max_innovation = derived.latest_innovation();
    let edge_innovation = basal.latest_innovation();

    let mut child = Genotype::default();
    for innovation in 1..=max_innovation {
        let derived_gene = derived.synapse_genes().get(&innovation);

        if innovation > edge_innovation {
            // excess range: only the fitter lineage may contribute
            if derived_is_fitter {
                if let Some(gene) = derived_gene {
                    inherit_synapse_gene(&mut child, innovation, gene.clone(), rng);
                }
            }
            continue;
        }

        let basal_gene = basal.synapse_genes().get(&innovation);
        match (derived_gene, basal_gene) {
            (Some(derived_gene), Some(basal_gene)) => {
                let gene = if rng.gen_range(0.0..1.0) < 0.5 {
                    derived_gene
                } else {
                    basal_gene
                };
                inherit_synapse_gene(&mut child, innovation, gene.clone(), rng);
            }
            (Some(gene), None) if derived_is_fitter => {
                inherit_synapse_gene(&mut child, innovation, gene.clone(), rng);
            }
            (None, Some(gene)) if !derived_is_fitter => {
                inherit_synapse_gene(&mut child, innovation, gene.clone(), rng);
            }
            _ => {}
        }
    }

    // structural inheritance guarantees the child's node set matches the
    // fitter parent's, so its node order and biases carry over unchanged
    child.set_node_order(fitter.node_order().to_vec());
    for &node_id in fitter.node_order() {
        let bias = fitter.neuron_genes()[&node_id];
        child.insert_neuron_gene(node_id, bias);
    }

    child
}

fn inherit_synapse_gene(
    child: &mut Genotype,
    innovation: Innovation,
    mut gene: SynapseGene,
    rng: &mut dyn RngCore,
) {
    if rng.gen_range(0.0..1.0) <= REENABLE_PROBABILITY {
        gene.enabled = true;
    }
    child.insert_synapse_gene(innovation, gene);
}
