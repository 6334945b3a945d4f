use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::graph::analysis::{find_cycle, find_lifecycle_deadlock};
use crate::graph::error::GraphError;
use crate::node::behavior::Operations;
use crate::node::{NodeKind, NodeSpec, Relation};

/// A node as stored in the graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub description: Option<String>,
    pub operations: Operations,
}

/// A validated dependency graph backed by petgraph.
///
/// Edges point from prerequisite to dependent and carry the declared
/// [`Relation`]. Node indices follow declaration order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub name: String,
    pub graph: DiGraph<GraphNode, Relation>,
    pub node_indices: Vec<NodeIndex>,
    index_by_id: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index_by_id.get(id).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn id(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].id
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn relation_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Declared relations of `idx` as `(relation, target)`, sorted by target.
    pub fn prerequisites_of(&self, idx: NodeIndex) -> Vec<(Relation, NodeIndex)> {
        let mut prereqs: Vec<(Relation, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (*e.weight(), e.source()))
            .collect();
        prereqs.sort_by_key(|(_, target)| *target);
        prereqs
    }
}

/// Build and validate a dependency graph from declared nodes.
///
/// # Errors
///
/// Fails on duplicate ids, references to unknown nodes, a target listed under
/// more than one relation, `uses`/`depends` on a test, a suite with a run
/// operation, a relation cycle, or a set of relations whose teardown
/// constraints can never all be satisfied.
pub fn build(nodes: Vec<NodeSpec>) -> Result<DependencyGraph, GraphError> {
    let mut index_by_id = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index_by_id.insert(node.id.clone(), NodeIndex::new(i)).is_some() {
            return Err(GraphError::DuplicateNode {
                id: node.id.clone(),
            });
        }
        if node.kind == NodeKind::Suite && node.operations.has_run() {
            return Err(GraphError::SuiteWithRun {
                node: node.id.clone(),
            });
        }
    }

    let mut edges: Vec<(NodeIndex, NodeIndex, Relation)> = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let mut seen: HashMap<&str, Relation> = HashMap::new();
        for (relation, target) in node.relations() {
            if let Some(&first) = seen.get(target) {
                if first == relation {
                    continue;
                }
                return Err(GraphError::OverlappingRelation {
                    node: node.id.clone(),
                    target: target.to_owned(),
                    first,
                    second: relation,
                });
            }
            let Some(&target_idx) = index_by_id.get(target) else {
                return Err(GraphError::UnknownReference {
                    node: node.id.clone(),
                    relation,
                    target: target.to_owned(),
                });
            };
            if relation.holds_target() && nodes[target_idx.index()].kind != NodeKind::Suite {
                return Err(GraphError::NotASuite {
                    node: node.id.clone(),
                    relation,
                    target: target.to_owned(),
                });
            }
            seen.insert(target, relation);
            edges.push((target_idx, NodeIndex::new(i), relation));
        }
    }

    let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
    let node_indices: Vec<NodeIndex> = nodes
        .into_iter()
        .map(|n| {
            graph.add_node(GraphNode {
                id: n.id,
                kind: n.kind,
                description: n.description,
                operations: n.operations,
            })
        })
        .collect();
    for (from, to, relation) in edges {
        graph.add_edge(from, to, relation);
    }

    if let Some(cycle) = find_cycle(&graph) {
        return Err(GraphError::Cycle {
            path: cycle.into_iter().map(|idx| graph[idx].id.clone()).collect(),
        });
    }
    if let Some(nodes) = find_lifecycle_deadlock(&graph) {
        return Err(GraphError::TeardownCycle {
            path: nodes.into_iter().map(|idx| graph[idx].id.clone()).collect(),
        });
    }

    debug!(
        nodes = graph.node_count(),
        relations = graph.edge_count(),
        "dependency graph built"
    );

    Ok(DependencyGraph {
        name: String::new(),
        graph,
        node_indices,
        index_by_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(dg: &DependencyGraph) -> Vec<&str> {
        dg.node_indices.iter().map(|&i| dg.id(i)).collect()
    }

    #[test]
    fn builds_empty_graph() {
        let dg = build(vec![]).unwrap();
        assert!(dg.is_empty());
        assert_eq!(dg.relation_count(), 0);
    }

    #[test]
    fn preserves_declaration_order() {
        let dg = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("Connect").uses("DB"),
            NodeSpec::test("Query").uses("DB").only_after("Connect"),
        ])
        .unwrap();
        assert_eq!(ids(&dg), vec!["DB", "Connect", "Query"]);
        assert_eq!(dg.relation_count(), 3);
        assert_eq!(dg.index_of("Query"), Some(NodeIndex::new(2)));
        assert_eq!(dg.index_of("Missing"), None);
    }

    #[test]
    fn edges_point_from_prerequisite_to_dependent() {
        let dg = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("Connect").uses("DB"),
        ])
        .unwrap();
        let connect = dg.index_of("Connect").unwrap();
        let db = dg.index_of("DB").unwrap();
        assert_eq!(dg.prerequisites_of(connect), vec![(Relation::Uses, db)]);
        assert!(dg.prerequisites_of(db).is_empty());
    }

    #[test]
    fn preserves_node_description() {
        let dg = build(vec![NodeSpec::suite("DB").describe("postgres 16")]).unwrap();
        assert_eq!(
            dg.node(NodeIndex::new(0)).description.as_deref(),
            Some("postgres 16")
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = build(vec![NodeSpec::suite("DB"), NodeSpec::test("DB")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode { id: "DB".into() });
    }

    #[test]
    fn rejects_unknown_reference() {
        let err = build(vec![NodeSpec::test("Connect").uses("DB")]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownReference {
                node: "Connect".into(),
                relation: Relation::Uses,
                target: "DB".into(),
            }
        );
    }

    #[test]
    fn rejects_target_in_two_relation_sets() {
        let err = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("T").uses("DB").depends("DB"),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::OverlappingRelation { .. }));
    }

    #[test]
    fn repeated_target_in_one_list_collapses() {
        let dg = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("T").uses("DB").uses("DB"),
        ])
        .unwrap();
        assert_eq!(dg.relation_count(), 1);
    }

    #[test]
    fn rejects_holding_a_test() {
        let err = build(vec![
            NodeSpec::test("A"),
            NodeSpec::test("B").depends("A"),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::NotASuite { .. }));
    }

    #[test]
    fn only_after_may_target_a_test() {
        let dg = build(vec![NodeSpec::test("A"), NodeSpec::test("B").only_after("A")]);
        assert!(dg.is_ok());
    }

    #[test]
    fn rejects_suite_with_run() {
        let err = build(vec![
            NodeSpec::suite("DB").on_run(|_ctx, _handles| async { Ok(()) }),
        ])
        .unwrap_err();
        assert_eq!(err, GraphError::SuiteWithRun { node: "DB".into() });
    }

    #[test]
    fn rejects_two_node_cycle() {
        let err = build(vec![
            NodeSpec::suite("A").depends("B"),
            NodeSpec::suite("B").depends("A"),
        ])
        .unwrap_err();
        match err {
            GraphError::Cycle { path } => {
                assert_eq!(path.len(), 2);
                assert!(path.contains(&"A".to_owned()));
                assert!(path.contains(&"B".to_owned()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn rejects_self_reference() {
        let err = build(vec![NodeSpec::test("A").only_after("A")]).unwrap_err();
        assert_eq!(err, GraphError::Cycle { path: vec!["A".into()] });
    }

    #[test]
    fn rejects_holding_and_awaiting_the_same_suite() {
        // Q holds S alive but also waits for S to terminate.
        let err = build(vec![
            NodeSpec::suite("S"),
            NodeSpec::test("T").only_after("S"),
            NodeSpec::test("Q").uses("S").only_after("T"),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::TeardownCycle { .. }), "{err:?}");
    }
}
