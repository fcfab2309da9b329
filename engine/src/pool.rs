use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;

use crate::crossover::crossover;
use crate::genome::{Genotype, Innovation};
use crate::graph::NodeId;
use crate::mutation;

pub type GenotypeId = u64;
pub type SpeciesId = u64;

// Genetic distance weights: excess, disjoint, mean parameter difference
const EXCESS_COEFFICIENT: f64 = 2.0;
const DISJOINT_COEFFICIENT: f64 = 2.0;
const PARAMETER_COEFFICIENT: f64 = 3.0;
/// Genomes smaller than this are not normalized by size.
const NORMALIZATION_CUTOFF: usize = 20;

/// Fatal conditions of an evolutionary run. Everything below extinction is
/// contained inside the pipeline stage that detects it.
#[derive(Debug, Error)]
pub enum EvolutionError {
    #[error("population went extinct at generation {generation}: no species survived pruning")]
    Extinction { generation: u64 },
}

/// Constants of a run, fixed at pool construction.
#[derive(Debug, Clone, Serialize)]
pub struct PoolConfig {
    pub population_size: u64,
    pub num_inputs: u16,
    pub num_outputs: u16,
    pub seed: u64,
    /// Two genomes within this distance of a representative share a species.
    pub genetic_distance_boundary: f64,
    pub interspecies_crossover_probability: f64,
    pub no_crossover_probability: f64,
    pub split_synapse_probability: f64,
    pub grow_synapse_probability: f64,
    pub mutate_synapse_weight_probability: f64,
    pub shift_synapse_weight_probability: f64,
    pub mutate_neuron_bias_probability: f64,
    pub shift_neuron_bias_probability: f64,
    /// Generations without improvement before a species may be pruned.
    pub stagnation_limit: u64,
    /// A stagnant species survives while its record stays above this fraction
    /// of the all-time fitness record.
    pub stagnation_fitness_fraction: f64,
    /// Minimum survivor count for a species to carry its champion over.
    pub champion_species_size: usize,
}

impl PoolConfig {
    pub fn new(population_size: u64, num_inputs: u16, num_outputs: u16) -> Self {
        Self {
            population_size,
            num_inputs,
            num_outputs,
            seed: 0,
            genetic_distance_boundary: 4.0,
            interspecies_crossover_probability: 0.001,
            no_crossover_probability: 0.25,
            split_synapse_probability: 0.03,
            grow_synapse_probability: 0.3,
            mutate_synapse_weight_probability: 0.8,
            shift_synapse_weight_probability: 0.9,
            mutate_neuron_bias_probability: 0.5,
            shift_neuron_bias_probability: 0.95,
            stagnation_limit: 15,
            stagnation_fitness_fraction: 0.9,
            champion_species_size: 5,
        }
    }
}

/// A cluster of genomes within the distance boundary of its representative.
/// The representative is resampled at random from the survivors every
/// generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Species {
    genotype_ids: Vec<GenotypeId>,
    representative: Genotype,
    champion_id: GenotypeId,
    adjusted_fitness: f64,
    fitness_record: f64,
    generations_without_improvement: u64,
}

impl Species {
    pub fn members(&self) -> &[GenotypeId] {
        &self.genotype_ids
    }

    pub fn representative(&self) -> &Genotype {
        &self.representative
    }

    pub fn champion_id(&self) -> GenotypeId {
        self.champion_id
    }

    pub fn adjusted_fitness(&self) -> f64 {
        self.adjusted_fitness
    }

    pub fn fitness_record(&self) -> f64 {
        self.fitness_record
    }
}

/// Genetic distance between two genomes, aligned by innovation number.
///
/// Genes are counted as matching (present in both), disjoint (present in one
/// within the other's innovation range) or excess (beyond the other's latest
/// innovation). Structural counts are normalized by the larger genome's size
/// unless both genomes are small; parameter divergence enters as the mean
/// absolute weight difference over matching genes plus the mean absolute bias
/// difference over node genes common to both.
pub fn genetic_distance(first: &Genotype, second: &Genotype) -> f64 {
    let (derived, basal) = if first.latest_innovation() > second.latest_innovation() {
        (first, second)
    } else {
        (second, first)
    };
    let max_innovation = derived.latest_innovation();
    let edge_innovation = basal.latest_innovation();

    let mut matching = 0u32;
    let mut disjoint = 0u32;
    let mut excess = 0u32;
    let mut weight_difference = 0.0;
    for innovation in 1..=max_innovation {
        let derived_gene = derived.synapse_genes().get(&innovation);
        if innovation <= edge_innovation {
            let basal_gene = basal.synapse_genes().get(&innovation);
            match (derived_gene, basal_gene) {
                (Some(derived_gene), Some(basal_gene)) => {
                    matching += 1;
                    weight_difference += (derived_gene.weight - basal_gene.weight).abs();
                }
                (Some(_), None) | (None, Some(_)) => disjoint += 1,
                (None, None) => {}
            }
        } else if derived_gene.is_some() {
            excess += 1;
        }
    }

    let mut normalization = first
        .synapse_genes()
        .len()
        .max(second.synapse_genes().len());
    if normalization < NORMALIZATION_CUTOFF {
        normalization = 1;
    }

    let mut common_neurons = 0u32;
    let mut bias_difference = 0.0;
    for (node_id, bias) in first.neuron_genes() {
        if let Some(other_bias) = second.neuron_genes().get(node_id) {
            common_neurons += 1;
            bias_difference += (bias - other_bias).abs();
        }
    }

    let mean_weight_difference = weight_difference / matching.max(1) as f64;
    let mean_bias_difference = bias_difference / common_neurons.max(1) as f64;

    (EXCESS_COEFFICIENT * excess as f64 + DISJOINT_COEFFICIENT * disjoint as f64)
        / normalization as f64
        + PARAMETER_COEFFICIENT * (mean_weight_difference + mean_bias_difference)
}

/// Owns every genotype of the current generation together with the species
/// clustering and the global counters that keep structural identifiers
/// consistent across genomes.
///
/// One call to [`GenePool::next_generation`] runs the strictly sequential
/// pipeline: speciate, cull, prune species, allocate offspring, reproduce,
/// mutate, reorder.
pub struct GenePool {
    config: PoolConfig,
    rng: ChaCha8Rng,

    innovation_index: Innovation,
    neuron_index: NodeId,

    species_index: SpeciesId,
    species: BTreeMap<SpeciesId, Species>,
    offspring_allotment: BTreeMap<SpeciesId, u64>,
    champion_ids: BTreeSet<GenotypeId>,
    species_record: Vec<Vec<f64>>,

    genotype_index: GenotypeId,
    genotypes: BTreeMap<GenotypeId, Genotype>,
    scores: BTreeMap<GenotypeId, f64>,

    generation: u64,
    fitness_record: f64,
}

impl GenePool {
    pub fn new(config: PoolConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut genotypes = BTreeMap::new();
        for id in 0..config.population_size {
            genotypes.insert(id, Genotype::new(config.num_inputs, config.num_outputs, &mut rng));
        }

        GenePool {
            innovation_index: config.num_inputs as Innovation * config.num_outputs as Innovation,
            neuron_index: config.num_outputs as NodeId,
            species_index: 0,
            species: BTreeMap::new(),
            offspring_allotment: BTreeMap::new(),
            champion_ids: BTreeSet::new(),
            species_record: Vec::new(),
            genotype_index: config.population_size - 1,
            genotypes,
            scores: BTreeMap::new(),
            generation: 0,
            fitness_record: 0.0,
            config,
            rng,
        }
    }

    /// Fitness scores for the current generation, supplied once per
    /// generation by the external scoring environment.
    pub fn set_scores(&mut self, scores: BTreeMap<GenotypeId, f64>) {
        self.scores = scores;
    }

    pub fn genotypes(&self) -> &BTreeMap<GenotypeId, Genotype> {
        &self.genotypes
    }

    pub fn species(&self) -> &BTreeMap<SpeciesId, Species> {
        &self.species
    }

    /// Per-generation history of each surviving species' share of the
    /// surviving population.
    pub fn species_record(&self) -> &[Vec<f64>] {
        &self.species_record
    }

    pub fn fitness_record(&self) -> f64 {
        self.fitness_record
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build the next generation from the current one and its scores.
    pub fn next_generation(&mut self) -> Result<(), EvolutionError> {
        self.speciate();
        self.cull_genotypes();
        self.prune_species()?;
        self.allocate_offspring();
        self.reproduce();
        self.mutate();
        for genotype in self.genotypes.values_mut() {
            genotype.order_nodes();
        }
        self.generation += 1;
        Ok(())
    }

    /// Assign every genotype to the first species whose representative is
    /// within the distance boundary, founding a new species when none is.
    fn speciate(&mut self) {
        for (&genotype_id, genotype) in &self.genotypes {
            let mut assigned = false;
            for species in self.species.values_mut() {
                let distance = genetic_distance(genotype, &species.representative);
                if distance <= self.config.genetic_distance_boundary {
                    species.genotype_ids.push(genotype_id);
                    assigned = true;
                    break;
                }
            }
            if !assigned {
                log::debug!(
                    "genotype {genotype_id} founded species {}",
                    self.species_index
                );
                let species = Species {
                    genotype_ids: vec![genotype_id],
                    representative: genotype.clone(),
                    ..Species::default()
                };
                self.species.insert(self.species_index, species);
                self.species_index += 1;
            }
        }
    }

    /// Within each species: adjust fitness by member count, crown the
    /// champion, delete the bottom half (at least one genotype survives) and
    /// track the species' fitness record and stagnation counter.
    fn cull_genotypes(&mut self) {
        for species in self.species.values_mut() {
            let count = species.genotype_ids.len();
            if count == 0 {
                continue;
            }

            let mut species_fitness = 0.0;
            let mut top_fitness = 0.0f64;
            for &genotype_id in &species.genotype_ids {
                let fitness = self.scores[&genotype_id];
                species_fitness += fitness;
                top_fitness = top_fitness.max(fitness);
                self.fitness_record = self.fitness_record.max(fitness);
            }
            species.adjusted_fitness = species_fitness / count as f64;

            species
                .genotype_ids
                .sort_by(|a, b| self.scores[b].total_cmp(&self.scores[a]));
            species.champion_id = species.genotype_ids[0];

            let keep = count.div_ceil(2);
            for &genotype_id in &species.genotype_ids[keep..] {
                self.genotypes.remove(&genotype_id);
                self.scores.remove(&genotype_id);
            }
            species.genotype_ids.truncate(keep);

            if top_fitness <= species.fitness_record {
                species.generations_without_improvement += 1;
            } else {
                species.generations_without_improvement = 0;
                species.fitness_record = top_fitness;
            }
        }

        let survivors = self.genotypes.len();
        let shares = self
            .species
            .values()
            .map(|species| species.genotype_ids.len() as f64 / survivors as f64)
            .collect();
        self.species_record.push(shares);
    }

    /// Remove species that received no genotypes, and stagnant species whose
    /// record has fallen well behind the all-time record. Emptying the
    /// species set entirely is extinction, fatal to the run.
    fn prune_species(&mut self) -> Result<(), EvolutionError> {
        let fitness_record = self.fitness_record;
        let limit = self.config.stagnation_limit;
        let fraction = self.config.stagnation_fitness_fraction;

        self.species.retain(|&species_id, species| {
            if species.genotype_ids.is_empty() {
                log::debug!("species {species_id} went extinct");
                return false;
            }
            if species.generations_without_improvement >= limit
                && species.fitness_record < fraction * fitness_record
            {
                log::debug!(
                    "species {species_id} pruned after {} stagnant generations",
                    species.generations_without_improvement
                );
                return false;
            }
            true
        });

        if self.species.is_empty() {
            log::error!("extinction at generation {}", self.generation);
            return Err(EvolutionError::Extinction {
                generation: self.generation,
            });
        }
        Ok(())
    }

    /// Split the next generation between the surviving species proportionally
    /// to adjusted fitness; leftover slots go round-robin through the species
    /// in id order so the total always matches the configured population.
    fn allocate_offspring(&mut self) {
        let total_adjusted: f64 = self
            .species
            .values()
            .map(|species| species.adjusted_fitness)
            .sum();

        self.offspring_allotment.clear();
        for (&species_id, species) in &self.species {
            let share = species.adjusted_fitness / total_adjusted * self.config.population_size as f64;
            self.offspring_allotment
                .insert(species_id, share.floor() as u64);
        }

        let allotted: u64 = self.offspring_allotment.values().sum();
        let mut remainder = self.config.population_size.saturating_sub(allotted);
        while remainder > 0 {
            for count in self.offspring_allotment.values_mut() {
                if remainder == 0 {
                    break;
                }
                *count += 1;
                remainder -= 1;
            }
        }
    }

    fn cumulative_fitness(
        scores: &BTreeMap<GenotypeId, f64>,
        genotype_ids: &[GenotypeId],
    ) -> Vec<f64> {
        // shift so the worst survivor maps to zero; negative and zero scores
        // then still yield usable shares
        let minimum = genotype_ids
            .iter()
            .map(|id| scores[id])
            .fold(f64::INFINITY, f64::min);
        let total: f64 = genotype_ids.iter().map(|id| scores[id] - minimum).sum();

        let mut cumulative = Vec::with_capacity(genotype_ids.len());
        let mut partial = 0.0;
        for genotype_id in genotype_ids {
            let share = if total > 0.0 {
                (scores[genotype_id] - minimum) / total
            } else {
                1.0 / genotype_ids.len() as f64
            };
            partial += share;
            cumulative.push(partial);
        }
        cumulative
    }

    fn pick_by_fitness(
        genotype_ids: &[GenotypeId],
        cumulative: &[f64],
        rng: &mut dyn RngCore,
    ) -> GenotypeId {
        let roll = rng.gen_range(0.0..1.0);
        for (index, &share) in cumulative.iter().enumerate() {
            if roll < share {
                return genotype_ids[index];
            }
        }
        genotype_ids[0]
    }

    /// Fill every species' allotted slots: the champion of a large enough
    /// species is copied over unchanged, the rest come from clones or
    /// crossover with fitness-proportionate parent selection. Afterwards each
    /// species resamples its representative from the survivors and clears its
    /// member list for the next round of speciation.
    fn reproduce(&mut self) {
        let species_ids: Vec<SpeciesId> = self.species.keys().copied().collect();
        let mut next: BTreeMap<GenotypeId, Genotype> = BTreeMap::new();

        self.champion_ids.clear();
        for &species_id in &species_ids {
            let species = &self.species[&species_id];
            let slots = self.offspring_allotment[&species_id];
            if species.genotype_ids.len() >= self.config.champion_species_size && slots > 0 {
                let champion_id = species.champion_id;
                next.insert(champion_id, self.genotypes[&champion_id].clone());
                if let Some(count) = self.offspring_allotment.get_mut(&species_id) {
                    *count -= 1;
                }
                self.champion_ids.insert(champion_id);
            }
        }

        for &species_id in &species_ids {
            let slots = self.offspring_allotment[&species_id];
            let member_ids = self.species[&species_id].genotype_ids.clone();
            let cumulative = Self::cumulative_fitness(&self.scores, &member_ids);

            for _ in 0..slots {
                self.genotype_index += 1;
                let child_id = self.genotype_index;

                let first_id = Self::pick_by_fitness(&member_ids, &cumulative, &mut self.rng);
                let roll = self.rng.gen_range(0.0..1.0);

                let child = if roll >= 1.0 - self.config.no_crossover_probability {
                    self.genotypes[&first_id].clone()
                } else {
                    let second_id = if roll < self.config.interspecies_crossover_probability
                        && species_ids.len() > 1
                    {
                        let other_ids: Vec<SpeciesId> = species_ids
                            .iter()
                            .copied()
                            .filter(|&id| id != species_id)
                            .collect();
                        let other_id = other_ids[self.rng.gen_range(0..other_ids.len())];
                        let other_members = self.species[&other_id].genotype_ids.clone();
                        let other_cumulative =
                            Self::cumulative_fitness(&self.scores, &other_members);
                        Self::pick_by_fitness(&other_members, &other_cumulative, &mut self.rng)
                    } else {
                        Self::pick_by_fitness(&member_ids, &cumulative, &mut self.rng)
                    };

                    let first = &self.genotypes[&first_id];
                    let second = &self.genotypes[&second_id];
                    if self.scores[&first_id] > self.scores[&second_id] {
                        crossover(first, second, &mut self.rng)
                    } else {
                        crossover(second, first, &mut self.rng)
                    }
                };
                next.insert(child_id, child);
            }
        }

        for species in self.species.values_mut() {
            if species.genotype_ids.is_empty() {
                continue;
            }
            let index = self.rng.gen_range(0..species.genotype_ids.len());
            let representative_id = species.genotype_ids[index];
            species.representative = self.genotypes[&representative_id].clone();
            species.genotype_ids.clear();
        }

        self.genotypes = next;
        self.scores.clear();
    }

    /// Structural mutations are proposed independently per genome but applied
    /// batched and deduplicated: every genome splitting the same innovation
    /// receives the same new node id and innovation pair, and every genome
    /// growing the same node pair the same innovation. Weight and bias
    /// mutation then runs per non-champion genome.
    fn mutate(&mut self) {
        let proposals = mutation::propose_structural(
            &self.genotypes,
            &self.champion_ids,
            &self.config,
            &mut self.rng,
        );

        for (target, genotype_ids) in proposals.splits {
            let first_innovation = self.innovation_index + 1;
            let second_innovation = self.innovation_index + 2;
            let new_node = self.neuron_index;
            for genotype_id in genotype_ids {
                if let Some(genotype) = self.genotypes.get_mut(&genotype_id) {
                    genotype.split_synapse(
                        first_innovation,
                        second_innovation,
                        new_node,
                        target,
                        &mut self.rng,
                    );
                }
            }
            self.innovation_index += 2;
            self.neuron_index += 1;
        }

        for ((start, end), genotype_ids) in proposals.grows {
            self.innovation_index += 1;
            for genotype_id in genotype_ids {
                if let Some(genotype) = self.genotypes.get_mut(&genotype_id) {
                    let weight = Genotype::random_weight(&mut self.rng);
                    genotype.add_synapse_gene(self.innovation_index, weight, start, end);
                }
            }
        }

        for (&genotype_id, genotype) in self.genotypes.iter_mut() {
            if self.champion_ids.contains(&genotype_id) {
                continue;
            }
            mutation::mutate_weights(genotype, &self.config, &mut self.rng);
            mutation::mutate_biases(genotype, &self.config, &mut self.rng);
        }
    }
}
