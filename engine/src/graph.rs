use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// Identifier of a node in the topology graph.
///
/// Negative ids are reserved for network inputs (`-1..=-num_inputs`); output
/// nodes start at `0..num_outputs` and hidden nodes receive freshly allocated
/// non-negative ids after that.
pub type NodeId = i32;

/// A single node of the acyclic topology graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Number of incoming edges. Only consumed by the depth layering pass.
    pub num_inputs: u32,
    /// Ids of the nodes this node feeds.
    pub outputs: BTreeSet<NodeId>,
    /// Longest path length from any zero-input node.
    pub depth: u32,
}

/// Directed acyclic graph over integer node ids.
///
/// Nodes are held in an arena keyed by id and edges are stored as id sets, so
/// the graph can grow incrementally without any reference cycles. Acyclicity
/// is an invariant: callers must gate arbitrary edge insertions through
/// [`Dag::connectable`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dag {
    nodes: BTreeMap<NodeId, Node>,
    node_order: Vec<NodeId>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent node insertion.
    pub fn add_node(&mut self, id: NodeId) {
        self.nodes.entry(id).or_default();
    }

    /// Insert the edge `start -> end`, creating missing endpoints.
    pub fn add_connection(&mut self, start: NodeId, end: NodeId) {
        self.add_node(start);
        self.add_node(end);
        if let Some(node) = self.nodes.get_mut(&start) {
            node.outputs.insert(end);
        }
        if let Some(node) = self.nodes.get_mut(&end) {
            node.num_inputs += 1;
        }
    }

    fn is_parent_of(&self, parent: NodeId, child: NodeId) -> bool {
        self.nodes
            .get(&parent)
            .is_some_and(|node| node.outputs.contains(&child))
    }

    fn is_ancestor_of(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        if self.is_parent_of(ancestor, descendant) {
            return true;
        }
        let Some(node) = self.nodes.get(&ancestor) else {
            return false;
        };
        node.outputs
            .iter()
            .any(|&child| self.is_ancestor_of(child, descendant))
    }

    /// Whether `start -> end` may be inserted without breaking the graph
    /// invariants: both endpoints must exist, self-loops and duplicate edges
    /// are rejected, and so is any edge from a descendant back to one of its
    /// ancestors.
    pub fn connectable(&self, start: NodeId, end: NodeId) -> bool {
        if !self.nodes.contains_key(&start) || !self.nodes.contains_key(&end) {
            return false;
        }
        if start == end {
            return false;
        }
        if self.is_ancestor_of(end, start) {
            return false;
        }
        if self.is_parent_of(start, end) {
            return false;
        }
        true
    }

    /// Kahn-style layering: every zero-input node sits at depth 0 and each
    /// node is finalized only after all of its predecessors, so `depth` ends
    /// up as the longest path length from the zero-input frontier.
    fn assign_depths(&mut self) {
        let mut remaining: BTreeMap<NodeId, u32> = BTreeMap::new();
        let mut frontier: Vec<NodeId> = Vec::new();

        for (&id, node) in &mut self.nodes {
            remaining.insert(id, node.num_inputs);
            node.depth = 0;
            if node.num_inputs == 0 {
                frontier.push(id);
            }
        }

        while let Some(id) = frontier.pop() {
            let (depth, outputs) = {
                let node = &self.nodes[&id];
                (node.depth, node.outputs.clone())
            };
            for output_id in outputs {
                if let Some(output) = self.nodes.get_mut(&output_id) {
                    output.depth = output.depth.max(depth + 1);
                }
                if let Some(count) = remaining.get_mut(&output_id) {
                    *count -= 1;
                    if *count == 0 {
                        frontier.push(output_id);
                    }
                }
            }
        }
    }

    /// Recompute depths and produce the full node ordering by non-decreasing
    /// depth (ties by ascending id). This ordering is what permits a single
    /// forward pass over the compiled network.
    pub fn order_nodes(&mut self) {
        self.assign_depths();
        let nodes = &self.nodes;
        let mut order: Vec<NodeId> = nodes.keys().copied().collect();
        order.sort_by_key(|id| nodes[id].depth);
        self.node_order = order;
    }

    pub fn node_order(&self) -> &[NodeId] {
        &self.node_order
    }

    pub(crate) fn set_node_order(&mut self, node_order: Vec<NodeId>) {
        self.node_order = node_order;
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain() -> Dag {
        let mut dag = Dag::new();
        dag.add_connection(-1, 0);
        dag.add_connection(0, 1);
        dag
    }

    #[test]
    fn connectable_rejects_missing_nodes() {
        let dag = chain();
        assert!(!dag.connectable(-1, 7));
        assert!(!dag.connectable(7, 0));
    }

    #[test]
    fn connectable_rejects_self_loop_and_duplicate() {
        let dag = chain();
        assert!(!dag.connectable(0, 0));
        assert!(!dag.connectable(-1, 0));
    }

    #[test]
    fn connectable_rejects_cycle_closing_edge() {
        let dag = chain();
        // 1 is a descendant of -1, so 1 -> -1 would close a cycle
        assert!(!dag.connectable(1, -1));
        assert!(!dag.connectable(1, 0));
        // skipping a level forward is fine
        assert!(dag.connectable(-1, 1));
    }

    #[test]
    fn diamond_depths() {
        let mut dag = Dag::new();
        dag.add_connection(-1, 0);
        dag.add_connection(-1, 1);
        dag.add_connection(0, 2);
        dag.add_connection(1, 2);
        dag.order_nodes();

        assert_eq!(dag.nodes()[&-1].depth, 0);
        assert_eq!(dag.nodes()[&0].depth, 1);
        assert_eq!(dag.nodes()[&1].depth, 1);
        assert_eq!(dag.nodes()[&2].depth, 2);
        assert_eq!(dag.node_order()[0], -1);
        assert_eq!(dag.node_order()[3], 2);
    }

    #[test]
    fn depth_reflects_longest_path() {
        let mut dag = Dag::new();
        dag.add_connection(-1, 0);
        dag.add_connection(-1, 1);
        dag.add_connection(1, 0);
        dag.order_nodes();

        // 0 is reachable both directly and through 1; the longer path wins
        assert_eq!(dag.nodes()[&0].depth, 2);
        assert_eq!(dag.node_order(), &[-1, 1, 0]);
    }

    #[test]
    fn reorder_after_incremental_growth() {
        let mut dag = chain();
        dag.order_nodes();
        assert_eq!(dag.node_order(), &[-1, 0, 1]);

        dag.add_node(5);
        dag.add_connection(5, 0);
        dag.order_nodes();
        assert_eq!(dag.node_order(), &[-1, 5, 0, 1]);
    }

    proptest! {
        #[test]
        fn guarded_insertions_keep_depths_monotonic(
            edges in proptest::collection::vec((0i32..8, 0i32..8), 0..48)
        ) {
            let mut dag = Dag::new();
            for id in 0..8 {
                dag.add_node(id);
            }
            for (start, end) in edges {
                if dag.connectable(start, end) {
                    dag.add_connection(start, end);
                }
            }
            dag.order_nodes();

            // every edge must descend strictly in depth, which also rules
            // out any cycle
            for (&id, node) in dag.nodes() {
                for &output_id in &node.outputs {
                    prop_assert!(dag.nodes()[&output_id].depth > dag.nodes()[&id].depth);
                }
            }

            // the produced order never places a node before an ancestor
            let position: BTreeMap<NodeId, usize> = dag
                .node_order()
                .iter()
                .enumerate()
                .map(|(index, &id)| (id, index))
                .collect();
            for (&id, node) in dag.nodes() {
                for &output_id in &node.outputs {
                    prop_assert!(position[&output_id] > position[&id]);
                }
            }
        }
    }
}
