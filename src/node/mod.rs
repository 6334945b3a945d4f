pub mod behavior;
pub mod lifecycle;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::behavior::{Behavior, Handle, Handles, NodeContext, OpError, Operations};

pub use lifecycle::{FailureCause, NodeRecord, NodeState, Op, Outcome, TransitionError};

/// Whether a node is a long-lived service or a test exercising one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Test,
    Suite,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Suite => write!(f, "suite"),
        }
    }
}

/// A declared relation from a node to one of its prerequisites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Ordering plus a live handle to the target suite.
    Uses,
    /// Ordering only: the target must stay running while this node lives.
    Depends,
    /// The target must have terminated successfully before this node starts.
    OnlyAfter,
}

impl Relation {
    /// Whether the relation keeps the target suite alive (counts toward its refcount).
    pub fn holds_target(self) -> bool {
        matches!(self, Self::Uses | Self::Depends)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uses => write!(f, "uses"),
            Self::Depends => write!(f, "depends"),
            Self::OnlyAfter => write!(f, "onlyAfter"),
        }
    }
}

/// A node as declared before graph construction: identity, kind,
/// relations and the operations the scheduler will invoke.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    pub description: Option<String>,
    pub uses: Vec<String>,
    pub depends: Vec<String>,
    pub only_after: Vec<String>,
    pub operations: Operations,
}

impl NodeSpec {
    /// Declare a node of the given kind with no relations and no-op operations.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            description: None,
            uses: Vec::new(),
            depends: Vec::new(),
            only_after: Vec::new(),
            operations: Operations::new(),
        }
    }

    pub fn suite(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Suite)
    }

    pub fn test(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Test)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn uses(mut self, target: impl Into<String>) -> Self {
        self.uses.push(target.into());
        self
    }

    pub fn depends(mut self, target: impl Into<String>) -> Self {
        self.depends.push(target.into());
        self
    }

    pub fn only_after(mut self, target: impl Into<String>) -> Self {
        self.only_after.push(target.into());
        self
    }

    /// All declared relations as `(relation, target)` pairs, in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = (Relation, &str)> {
        let uses = self.uses.iter().map(|t| (Relation::Uses, t.as_str()));
        let depends = self.depends.iter().map(|t| (Relation::Depends, t.as_str()));
        let only_after = self
            .only_after
            .iter()
            .map(|t| (Relation::OnlyAfter, t.as_str()));
        uses.chain(depends).chain(only_after)
    }

    pub fn with_operations(mut self, operations: Operations) -> Self {
        self.operations = operations;
        self
    }

    /// Bind all operations from a [`Behavior`] implementation.
    /// Suites only take `start` and `stop` from it.
    pub fn with_behavior<B: Behavior>(self, behavior: Arc<B>) -> Self {
        let kind = self.kind;
        self.with_operations(Operations::from_behavior(kind, behavior))
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Handle>, OpError>> + Send + 'static,
    {
        self.operations = self.operations.on_start(f);
        self
    }

    pub fn on_run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeContext, Handles) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OpError>> + Send + 'static,
    {
        self.operations = self.operations.on_run(f);
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OpError>> + Send + 'static,
    {
        self.operations = self.operations.on_stop(f);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_constructor_sets_kind() {
        let node = NodeSpec::suite("db");
        assert_eq!(node.id, "db");
        assert_eq!(node.kind, NodeKind::Suite);
        assert!(node.uses.is_empty());
        assert!(!node.operations.has_start());
    }

    #[test]
    fn relations_iterate_in_declaration_order() {
        let node = NodeSpec::test("query")
            .uses("db")
            .depends("cache")
            .only_after("connect");
        let rels: Vec<(Relation, &str)> = node.relations().collect();
        assert_eq!(
            rels,
            vec![
                (Relation::Uses, "db"),
                (Relation::Depends, "cache"),
                (Relation::OnlyAfter, "connect"),
            ]
        );
    }

    #[test]
    fn only_uses_and_depends_hold_their_target() {
        assert!(Relation::Uses.holds_target());
        assert!(Relation::Depends.holds_target());
        assert!(!Relation::OnlyAfter.holds_target());
    }

    #[test]
    fn display_names() {
        assert_eq!(NodeKind::Suite.to_string(), "suite");
        assert_eq!(NodeKind::Test.to_string(), "test");
        assert_eq!(Relation::OnlyAfter.to_string(), "onlyAfter");
    }

    #[test]
    fn operation_builders_fill_slots() {
        let node = NodeSpec::test("t")
            .on_start(|_ctx| async { Ok(None) })
            .on_run(|_ctx, _handles| async { Ok(()) });
        assert!(node.operations.has_start());
        assert!(node.operations.has_run());
        assert!(!node.operations.has_stop());
    }
}
