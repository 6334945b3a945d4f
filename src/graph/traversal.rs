use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::Direction;
use petgraph::graph::NodeIndex;

use crate::graph::analysis::root_nodes;
use crate::graph::builder::DependencyGraph;

/// Topological start order. Every prerequisite precedes its dependents;
/// among nodes that become available together, declaration order wins.
///
/// This is a listing order only. The scheduler starts nodes concurrently as
/// they become ready.
pub fn start_order(dg: &DependencyGraph) -> Vec<NodeIndex> {
    let mut in_degree: Vec<usize> = dg
        .node_indices
        .iter()
        .map(|&idx| {
            dg.graph
                .neighbors_directed(idx, Direction::Incoming)
                .count()
        })
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> =
        root_nodes(dg).into_iter().map(Reverse).collect();
    let mut order = Vec::with_capacity(dg.len());

    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for next in dg.graph.neighbors_directed(idx, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    order
}

/// Like [`start_order`], but as node ids.
pub fn start_order_ids(dg: &DependencyGraph) -> Vec<&str> {
    start_order(dg).into_iter().map(|idx| dg.id(idx)).collect()
}
