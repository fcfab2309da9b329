pub mod crossover;
pub mod genome;
pub mod graph;
mod mutation;
pub mod network;
pub mod pool;
pub mod population;
pub mod scoring;

pub use crossover::crossover;
pub use genome::{Genotype, Innovation, SynapseGene};
pub use graph::{Dag, Node, NodeId};
pub use network::{sigmoid, Network};
pub use pool::{
    genetic_distance, EvolutionError, GenePool, GenotypeId, PoolConfig, Species, SpeciesId,
};
pub use population::Population;
pub use scoring::{Environment, XorEnvironment};
