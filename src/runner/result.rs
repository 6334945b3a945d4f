use std::fmt;
use std::time::Duration;

use crate::node::{FailureCause, NodeKind, NodeRecord, Outcome};

/// Coarse classification of a terminated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Passed,
    /// Failed through one of its own operations or a runtime error.
    Failed,
    /// Never ran to completion because a prerequisite failed.
    Aborted,
    /// Not terminated. Only seen in results built mid-run.
    Pending,
}

impl NodeStatus {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Pending => Self::Pending,
            Outcome::Success => Self::Passed,
            Outcome::Failure { cause, .. } if cause.is_abort() => Self::Aborted,
            Outcome::Failure { .. } => Self::Failed,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Final record of one node, emitted once it terminates.
///
/// Timestamps are offsets from the start of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub node: String,
    pub kind: NodeKind,
    pub outcome: Outcome,
    pub started_at: Option<Duration>,
    pub running_at: Option<Duration>,
    pub terminated_at: Option<Duration>,
}

impl NodeResult {
    pub fn from_record(node: &str, kind: NodeKind, record: &NodeRecord) -> Self {
        Self {
            node: node.to_owned(),
            kind,
            outcome: record.outcome().clone(),
            started_at: record.started_at(),
            running_at: record.running_at(),
            terminated_at: record.terminated_at(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_outcome(&self.outcome)
    }

    pub fn cause(&self) -> Option<FailureCause> {
        self.outcome.cause()
    }

    pub fn message(&self) -> Option<&str> {
        self.outcome.message()
    }

    /// Time from entering `starting` to `terminated`. Zero for nodes that never started.
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.terminated_at) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => Duration::ZERO,
        }
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl RunSummary {
    pub fn from_results(results: &[NodeResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status() {
                NodeStatus::Passed => summary.passed += 1,
                NodeStatus::Failed | NodeStatus::Pending => summary.failed += 1,
                NodeStatus::Aborted => summary.aborted += 1,
            }
        }
        summary
    }

    /// A run succeeds only if every node succeeded.
    pub fn success(&self) -> bool {
        self.passed == self.total
    }
}

/// Outcome of a whole run, with nodes in declaration order.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub name: String,
    pub total_duration: Duration,
    pub nodes: Vec<NodeResult>,
    pub summary: RunSummary,
}

impl RunResult {
    pub fn new(name: impl Into<String>, total_duration: Duration, nodes: Vec<NodeResult>) -> Self {
        let summary = RunSummary::from_results(&nodes);
        Self {
            name: name.into(),
            total_duration,
            nodes,
            summary,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeResult> {
        self.nodes.iter().find(|n| n.node == id)
    }

    pub fn success(&self) -> bool {
        self.summary.success()
    }
}
