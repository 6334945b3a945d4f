use thiserror::Error;

use crate::node::Relation;

/// Errors that prevent a run from starting. Nothing is scheduled when
/// graph construction fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate node id '{id}'")]
    DuplicateNode { id: String },

    #[error("node '{node}' {relation} unknown node '{target}'")]
    UnknownReference {
        node: String,
        relation: Relation,
        target: String,
    },

    #[error("node '{node}' lists '{target}' under both {first} and {second}")]
    OverlappingRelation {
        node: String,
        target: String,
        first: Relation,
        second: Relation,
    },

    #[error("node '{node}' {relation} '{target}', which is a test; only suites can be held")]
    NotASuite {
        node: String,
        relation: Relation,
        target: String,
    },

    #[error("suite '{node}' declares a run operation")]
    SuiteWithRun { node: String },

    #[error("cycle detected: {}", render_path(.path))]
    Cycle { path: Vec<String> },

    #[error("teardown deadlock: {} can never all terminate", render_path(.path))]
    TeardownCycle { path: Vec<String> },
}

impl GraphError {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::DuplicateNode { .. } => "duplicate_node",
            Self::UnknownReference { .. } => "unknown_reference",
            Self::OverlappingRelation { .. } => "overlapping_relation",
            Self::NotASuite { .. } => "not_a_suite",
            Self::SuiteWithRun { .. } => "suite_with_run",
            Self::Cycle { .. } => "cycle",
            Self::TeardownCycle { .. } => "teardown_cycle",
        }
    }
}

/// `a -> b -> a`: the path closed back onto its first element.
fn render_path(path: &[String]) -> String {
    let mut parts: Vec<&str> = path.iter().map(String::as_str).collect();
    if let Some(first) = path.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}
