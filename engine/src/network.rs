use std::collections::BTreeMap;

use crate::genome::Genotype;
use crate::graph::NodeId;

/// Steepened logistic activation applied by hidden nodes.
pub fn sigmoid(value: f64) -> f64 {
    1.0 / (1.0 + (-4.9 * value).exp())
}

#[derive(Debug, Clone, Copy)]
struct Connection {
    /// Index of the downstream node in the flattened node array.
    target: usize,
    weight: f64,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct ExecutableNode {
    id: NodeId,
    bias: f64,
    accumulator: f64,
    connections: Vec<Connection>,
}

/// Executable form of a genotype.
///
/// Compilation flattens the genome into an array ordered by the genotype's
/// precomputed topological node order, with edges resolved to array indices.
/// A single forward pass over that array evaluates the whole network; for a
/// fixed genome and input map the result is bit-identical across calls.
#[derive(Debug, Clone)]
pub struct Network {
    nodes: Vec<ExecutableNode>,
    indices: BTreeMap<NodeId, usize>,
}

impl Network {
    pub fn compile(genotype: &Genotype) -> Self {
        let indices: BTreeMap<NodeId, usize> = genotype
            .node_order()
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect();

        let mut nodes: Vec<ExecutableNode> = genotype
            .node_order()
            .iter()
            .map(|&id| ExecutableNode {
                id,
                bias: genotype.neuron_genes().get(&id).copied().unwrap_or(0.0),
                accumulator: 0.0,
                connections: Vec::new(),
            })
            .collect();

        for gene in genotype.synapse_genes().values() {
            let (Some(&source), Some(&target)) = (indices.get(&gene.start), indices.get(&gene.end))
            else {
                continue;
            };
            nodes[source].connections.push(Connection {
                target,
                weight: gene.weight,
                enabled: gene.enabled,
            });
        }

        Network { nodes, indices }
    }

    /// One forward pass. Input values are loaded straight into the
    /// accumulators of their nodes and bypass activation; hidden nodes apply
    /// the logistic; nodes with no outgoing edges are the network outputs and
    /// report their raw pre-activation sum.
    pub fn execute(&mut self, inputs: &BTreeMap<NodeId, f64>) -> BTreeMap<NodeId, f64> {
        for node in &mut self.nodes {
            node.accumulator = 0.0;
        }
        for (&node_id, &value) in inputs {
            if let Some(&index) = self.indices.get(&node_id) {
                self.nodes[index].accumulator = value;
            }
        }

        let mut outputs = BTreeMap::new();
        for index in 0..self.nodes.len() {
            let node_id = self.nodes[index].id;
            let raw = self.nodes[index].accumulator + self.nodes[index].bias;

            if self.nodes[index].connections.is_empty() {
                outputs.insert(node_id, raw);
                continue;
            }

            let output = if inputs.contains_key(&node_id) {
                raw
            } else {
                sigmoid(raw)
            };
            for position in 0..self.nodes[index].connections.len() {
                let connection = self.nodes[index].connections[position];
                if connection.enabled {
                    self.nodes[connection.target].accumulator += connection.weight * output;
                }
            }
        }
        outputs
    }
}
