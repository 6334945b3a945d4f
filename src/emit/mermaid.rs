use petgraph::visit::EdgeRef;

use crate::graph::DependencyGraph;
use crate::node::{NodeKind, Relation};

/// Emit a dependency graph as a Mermaid flowchart diagram.
pub fn emit_mermaid(dg: &DependencyGraph) -> String {
    let mut out = String::from("graph TD\n");

    for &idx in &dg.node_indices {
        let node = dg.node(idx);
        let label = node.description.as_deref().unwrap_or(node.id.as_str());
        match node.kind {
            NodeKind::Suite => out.push_str(&format!("  {}[[\"{}\"]]\n", node.id, label)),
            NodeKind::Test => out.push_str(&format!("  {}[\"{}\"]\n", node.id, label)),
        }
    }

    for edge in dg.graph.edge_references() {
        let src = dg.id(edge.source());
        let dst = dg.id(edge.target());
        match edge.weight() {
            Relation::OnlyAfter => {
                out.push_str(&format!("  {src} -.->|onlyAfter| {dst}\n"));
            }
            relation => out.push_str(&format!("  {src} -->|{relation}| {dst}\n")),
        }
    }

    out
}
