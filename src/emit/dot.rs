use petgraph::visit::EdgeRef;

use crate::graph::DependencyGraph;
use crate::node::{NodeKind, Relation};

/// Emit a dependency graph as a DOT (Graphviz) diagram.
///
/// Suites are boxes, tests ellipses. Edges run from prerequisite to
/// dependent, labelled with the relation; `onlyAfter` edges are dashed.
pub fn emit_dot(dg: &DependencyGraph) -> String {
    let mut out = format!("digraph \"{}\" {{\n", dg.name);

    for &idx in &dg.node_indices {
        let node = dg.node(idx);
        let label = node.description.as_deref().unwrap_or(node.id.as_str());
        let shape = match node.kind {
            NodeKind::Suite => "box",
            NodeKind::Test => "ellipse",
        };
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\", shape={shape}];\n",
            node.id,
            escape(label)
        ));
    }

    for edge in dg.graph.edge_references() {
        let src = dg.id(edge.source());
        let dst = dg.id(edge.target());
        let relation = edge.weight();
        let style = if *relation == Relation::OnlyAfter {
            ", style=dashed"
        } else {
            ""
        };
        out.push_str(&format!(
            "  \"{src}\" -> \"{dst}\" [label=\"{relation}\"{style}];\n"
        ));
    }

    out.push_str("}\n");
    out
}

fn escape(label: &str) -> String {
    label.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use crate::node::NodeSpec;

    fn scenario() -> DependencyGraph {
        build(vec![
            NodeSpec::suite("DB").describe("Postgres"),
            NodeSpec::test("Connect").uses("DB"),
            NodeSpec::test("Query").uses("DB").only_after("Connect"),
        ])
        .unwrap()
        .named("Scenario")
    }

    #[test]
    fn dot_empty_graph() {
        let dot = emit_dot(&build(vec![]).unwrap().named("G"));
        assert!(dot.contains("digraph \"G\""));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn dot_nodes_use_description_and_shape() {
        let dot = emit_dot(&scenario());
        assert!(dot.contains("\"DB\" [label=\"Postgres\", shape=box]"));
        assert!(dot.contains("\"Connect\" [label=\"Connect\", shape=ellipse]"));
    }

    #[test]
    fn dot_edges_carry_relation() {
        let dot = emit_dot(&scenario());
        assert!(dot.contains("\"DB\" -> \"Connect\" [label=\"uses\"];"));
        assert!(dot.contains("\"Connect\" -> \"Query\" [label=\"onlyAfter\", style=dashed];"));
    }

    #[test]
    fn dot_escapes_quotes() {
        let dg = build(vec![NodeSpec::suite("DB").describe("the \"main\" db")]).unwrap();
        assert!(emit_dot(&dg).contains("label=\"the \\\"main\\\" db\""));
    }
}
