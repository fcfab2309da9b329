use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::network::Network;
use crate::pool::{EvolutionError, GenePool, GenotypeId, PoolConfig};
use crate::scoring::Environment;

/// Drives a gene pool through repeated score/select rounds against a fitness
/// environment.
///
/// Scoring is the one parallel phase: compiled networks and their score slots
/// are partitioned into contiguous disjoint chunks, one per worker, each
/// worker writing only its own slots of the pre-sized buffer. The workers are
/// joined before the scores are merged back and the strictly sequential
/// evolutionary pipeline runs.
pub struct Population<E: Environment> {
    pool: GenePool,
    environment: E,
    top_generation_fitness: f64,
    fitness_history: Vec<f64>,
    best_genotype_id: Option<GenotypeId>,
}

impl<E: Environment> Population<E> {
    pub fn new(config: PoolConfig, environment: E) -> Self {
        Population {
            pool: GenePool::new(config),
            environment,
            top_generation_fitness: 0.0,
            fitness_history: Vec::new(),
            best_genotype_id: None,
        }
    }

    /// Compile every genotype, score the compiled networks in parallel and
    /// hand the scores to the pool.
    pub fn score_generation(&mut self) {
        let mut networks: Vec<(GenotypeId, Network)> = self
            .pool
            .genotypes()
            .iter()
            .map(|(&genotype_id, genotype)| (genotype_id, Network::compile(genotype)))
            .collect();
        let mut scores = vec![0.0f64; networks.len()];

        let workers = rayon::current_num_threads().max(1);
        let chunk = networks.len().div_ceil(workers).max(1);
        let environment = &self.environment;
        scores
            .par_chunks_mut(chunk)
            .zip(networks.par_chunks_mut(chunk))
            .for_each(|(score_slots, network_chunk)| {
                for (slot, (_, network)) in score_slots.iter_mut().zip(network_chunk.iter_mut()) {
                    *slot = environment.score(network);
                }
            });

        self.top_generation_fitness = 0.0;
        self.best_genotype_id = None;
        let mut score_map = BTreeMap::new();
        for ((genotype_id, _), &score) in networks.iter().zip(&scores) {
            if score > self.top_generation_fitness {
                self.top_generation_fitness = score;
                self.best_genotype_id = Some(*genotype_id);
            }
            score_map.insert(*genotype_id, score);
        }

        self.pool.set_scores(score_map);
        self.fitness_history.push(self.top_generation_fitness);
        log::info!(
            "generation {} top fitness {} / {}",
            self.pool.generation(),
            self.top_generation_fitness,
            self.pool.fitness_record()
        );
    }

    /// Advance to the next generation. Must follow a scoring pass.
    pub fn select(&mut self) -> Result<(), EvolutionError> {
        self.pool.next_generation()
    }

    /// Convenience loop: score and select `generations` times.
    pub fn run(&mut self, generations: u64) -> Result<(), EvolutionError> {
        for _ in 0..generations {
            self.score_generation();
            self.select()?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &GenePool {
        &self.pool
    }

    pub fn top_generation_fitness(&self) -> f64 {
        self.top_generation_fitness
    }

    /// Best score of each generation scored so far.
    pub fn fitness_history(&self) -> &[f64] {
        &self.fitness_history
    }

    /// Fittest genotype of the most recently scored generation. `None` until
    /// a generation has been scored, or when every score was non-positive.
    pub fn best_genotype_id(&self) -> Option<GenotypeId> {
        self.best_genotype_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::XorEnvironment;

    /// Scores every network the same, exercising the pipeline and the
    /// compiled-network boundary without any simulation.
    struct ConstantEnvironment;

    impl Environment for ConstantEnvironment {
        fn score(&self, network: &mut Network) -> f64 {
            let outputs = network.execute(&BTreeMap::from([(-1, 1.0), (-2, 0.5)]));
            // any finite output counts; the score itself ignores it
            assert!(outputs.values().all(|value| value.is_finite()));
            1.0
        }
    }

    #[test]
    fn scoring_fills_history_and_preserves_population() {
        let mut config = PoolConfig::new(16, 2, 1);
        config.seed = 21;
        let mut population = Population::new(config, ConstantEnvironment);

        population.run(3).expect("no extinction");
        assert_eq!(population.fitness_history().len(), 3);
        assert_eq!(population.pool().genotypes().len(), 16);
        assert_eq!(population.top_generation_fitness(), 1.0);
        assert!(population.best_genotype_id().is_some());
    }

    #[test]
    fn xor_run_executes_end_to_end() {
        let mut config = PoolConfig::new(24, 2, 1);
        config.seed = 4;
        let mut population = Population::new(config, XorEnvironment);

        population.run(4).expect("no extinction");
        // XOR scores live in [0, 4] and the record only ever rises
        assert!(population.pool().fitness_record() <= 4.0);
        assert!(population.pool().fitness_record() > 0.0);
        let shares = population.pool().species_record();
        assert_eq!(shares.len(), 4);
        for generation in shares {
            let total: f64 = generation.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
