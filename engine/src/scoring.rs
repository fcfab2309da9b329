use std::collections::BTreeMap;

use crate::network::{sigmoid, Network};

/// A fitness environment: given a compiled network, produce a score.
///
/// The evolutionary core never simulates anything itself; interchangeable
/// environments close that loop. `Sync` lets a generation be scored from
/// parallel workers against one shared environment.
pub trait Environment: Sync {
    fn score(&self, network: &mut Network) -> f64;
}

/// XOR truth table, the classic NEAT benchmark. Expects two inputs and one
/// output; the raw output is squashed before comparison since sinks report
/// pre-activation sums. A perfect network scores 4.
pub struct XorEnvironment;

const XOR_CASES: [([f64; 2], f64); 4] = [
    ([0.0, 0.0], 0.0),
    ([0.0, 1.0], 1.0),
    ([1.0, 0.0], 1.0),
    ([1.0, 1.0], 0.0),
];

impl Environment for XorEnvironment {
    fn score(&self, network: &mut Network) -> f64 {
        let mut total_error = 0.0;
        for (case, expected) in XOR_CASES {
            let inputs = BTreeMap::from([(-1, case[0]), (-2, case[1])]);
            let outputs = network.execute(&inputs);
            let output = sigmoid(outputs[&0]);
            let error = expected - output;
            total_error += error * error;
        }
        (4.0 - total_error).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genotype;

    /// Hand-wired solution: a hidden AND gate subtracted from an OR-ish
    /// direct path, all driven far into the sigmoid's saturated region.
    fn xor_solution() -> Genotype {
        let mut genotype = Genotype::default();
        genotype.add_neuron_gene(-1, 0.0);
        genotype.add_neuron_gene(-2, 0.0);
        genotype.add_neuron_gene(0, -10.0);
        genotype.add_neuron_gene(1, -15.0);
        genotype.add_synapse_gene(1, 20.0, -1, 0);
        genotype.add_synapse_gene(2, 20.0, -2, 0);
        genotype.add_synapse_gene(3, 10.0, -1, 1);
        genotype.add_synapse_gene(4, 10.0, -2, 1);
        genotype.add_synapse_gene(5, -40.0, 1, 0);
        genotype.order_nodes();
        genotype
    }

    #[test]
    fn solved_xor_scores_near_four() {
        let mut network = Network::compile(&xor_solution());
        let score = XorEnvironment.score(&mut network);
        assert!(score > 3.9, "score was {score}");
    }

    #[test]
    fn broken_network_scores_below_solution() {
        let mut genotype = xor_solution();
        // severing the hidden gate turns XOR into OR, failing the (1,1) case
        genotype.set_synapse_weight(5, 0.0);
        let mut network = Network::compile(&genotype);
        let score = XorEnvironment.score(&mut network);
        assert!(score < 3.2, "score was {score}");
    }
}
