use std::collections::HashSet;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::graph::builder::{DependencyGraph, GraphNode};
use crate::node::Relation;

/// Find a cycle in a directed graph, returning the node indices along it.
/// A self-loop is a cycle of one. Returns `None` if the graph is acyclic.
pub fn find_cycle<N, E>(graph: &DiGraph<N, E>) -> Option<Vec<NodeIndex>> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut stack_path = Vec::new();

    for start in graph.node_indices() {
        if !visited.contains(&start)
            && let Some(cycle) =
                dfs_find_cycle(graph, start, &mut visited, &mut in_stack, &mut stack_path)
        {
            return Some(cycle);
        }
    }

    None
}

fn dfs_find_cycle<N, E>(
    graph: &DiGraph<N, E>,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    in_stack: &mut HashSet<NodeIndex>,
    stack_path: &mut Vec<NodeIndex>,
) -> Option<Vec<NodeIndex>> {
    visited.insert(node);
    in_stack.insert(node);
    stack_path.push(node);

    let mut neighbors: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Outgoing).collect();
    neighbors.sort_unstable();
    neighbors.dedup();

    for neighbor in neighbors {
        if !visited.contains(&neighbor) {
            if let Some(cycle) = dfs_find_cycle(graph, neighbor, visited, in_stack, stack_path) {
                return Some(cycle);
            }
        } else if in_stack.contains(&neighbor)
            && let Some(cycle_start) = stack_path.iter().position(|&n| n == neighbor)
        {
            return Some(stack_path[cycle_start..].to_vec());
        }
    }

    stack_path.pop();
    in_stack.remove(&node);
    None
}

/// Check that every node can reach `running` and `terminated` under the
/// declared relations, returning the nodes of a blocking loop if not.
///
/// Relations impose precedence between lifecycle events:
/// a held suite is running before its holder runs, and the holder terminates
/// before the suite does; an `onlyAfter` target terminates before the
/// dependent runs. A node always runs before it terminates. A loop in these
/// precedences is a deadlock that the relation graph alone does not show,
/// e.g. a node that holds a suite while also waiting for it to terminate.
pub fn find_lifecycle_deadlock(graph: &DiGraph<GraphNode, Relation>) -> Option<Vec<NodeIndex>> {
    let n = graph.node_count();
    // Event 2i: node i running. Event 2i + 1: node i terminated.
    let running = |idx: NodeIndex| NodeIndex::new(idx.index() * 2);
    let terminated = |idx: NodeIndex| NodeIndex::new(idx.index() * 2 + 1);

    let mut events: DiGraph<(), ()> = DiGraph::with_capacity(n * 2, n + graph.edge_count() * 2);
    for _ in 0..n * 2 {
        events.add_node(());
    }
    for idx in graph.node_indices() {
        events.add_edge(running(idx), terminated(idx), ());
    }
    for edge in graph.edge_references() {
        let (target, dependent) = (edge.source(), edge.target());
        if target == dependent {
            continue;
        }
        match edge.weight() {
            Relation::Uses | Relation::Depends => {
                events.add_edge(running(target), running(dependent), ());
                events.add_edge(terminated(dependent), terminated(target), ());
            }
            Relation::OnlyAfter => {
                events.add_edge(terminated(target), running(dependent), ());
            }
        }
    }

    let cycle = find_cycle(&events)?;
    let mut nodes: Vec<NodeIndex> = Vec::new();
    for event in cycle {
        let node = NodeIndex::new(event.index() / 2);
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }
    Some(nodes)
}

/// Nodes with no declared relations.
pub fn root_nodes(dg: &DependencyGraph) -> Vec<NodeIndex> {
    dg.node_indices
        .iter()
        .filter(|&&idx| {
            dg.graph
                .neighbors_directed(idx, Direction::Incoming)
                .next()
                .is_none()
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::build;
    use crate::node::NodeSpec;

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let mut g: DiGraph<(), ()> = DiGraph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        let c = g.add_node(());
        g.add_edge(a, b, ());
        g.add_edge(b, c, ());
        g.add_edge(a, c, ());
        assert!(find_cycle(&g).is_none());
    }

    #[test]
    fn finds_three_node_cycle() {
        let mut g: DiGraph<(), ()> = DiGraph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        let c = g.add_node(());
        g.add_edge(a, b, ());
        g.add_edge(b, c, ());
        g.add_edge(c, a, ());
        assert_eq!(find_cycle(&g), Some(vec![a, b, c]));
    }

    #[test]
    fn finds_self_loop() {
        let mut g: DiGraph<(), ()> = DiGraph::new();
        let a = g.add_node(());
        g.add_edge(a, a, ());
        assert_eq!(find_cycle(&g), Some(vec![a]));
    }

    #[test]
    fn end_to_end_scenario_is_schedulable() {
        let dg = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("Connect").uses("DB"),
            NodeSpec::test("Query").uses("DB").only_after("Connect"),
        ])
        .unwrap();
        assert!(find_lifecycle_deadlock(&dg.graph).is_none());
    }

    #[test]
    fn only_after_a_held_suite_deadlocks() {
        let mut g: DiGraph<GraphNode, Relation> = DiGraph::new();
        let node = |id: &str, kind| GraphNode {
            id: id.into(),
            kind,
            description: None,
            operations: Default::default(),
        };
        let s = g.add_node(node("S", crate::node::NodeKind::Suite));
        let q = g.add_node(node("Q", crate::node::NodeKind::Test));
        g.add_edge(s, q, Relation::Uses);
        g.add_edge(s, q, Relation::OnlyAfter);
        let nodes = find_lifecycle_deadlock(&g).unwrap();
        assert!(nodes.contains(&s) && nodes.contains(&q));
    }

    #[test]
    fn roots_have_no_relations() {
        let dg = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("Connect").uses("DB"),
            NodeSpec::test("Lint"),
        ])
        .unwrap();
        let names = |v: Vec<NodeIndex>| v.into_iter().map(|i| dg.id(i).to_owned()).collect::<Vec<_>>();
        assert_eq!(names(root_nodes(&dg)), vec!["DB", "Lint"]);
    }
}
