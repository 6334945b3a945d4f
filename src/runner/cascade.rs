//! Failure cascade: what happens when a suite dies while others rely on it.
//!
//! The cascade is computed and applied to the node records in one pass, with
//! no I/O. The scheduler then reports the terminated nodes and launches the
//! best-effort stop, if any.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use petgraph::graph::NodeIndex;
use tracing::{debug, warn};

use crate::graph::DependencyGraph;
use crate::node::{FailureCause, NodeKind, NodeRecord, NodeState, Outcome};

/// Effects of one suite failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadePlan {
    /// The failed suite was terminated with `runtime-error`.
    pub suite_marked: bool,
    /// The failed suite was running and has a stop operation worth trying.
    /// Its result is ignored.
    pub best_effort_stop: bool,
    /// Dependents force-terminated with `aborted-by-dependency`, in cascade order.
    pub aborted: Vec<NodeIndex>,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        !self.suite_marked && self.aborted.is_empty()
    }
}

/// Apply the failure of `suite` to `records`.
///
/// A suite in `starting` or `running` is terminated with `runtime-error`.
/// A suite already in `stopping` keeps tearing down; the failure is recorded
/// and reported when its stop resolves. Every dependent in `waiting`,
/// `starting` or `running` is terminated with `aborted-by-dependency`,
/// transitively through dependent suites. Terminated nodes release the
/// suites they hold and have their cancellation token fired.
pub fn on_suite_failure(
    graph: &DependencyGraph,
    records: &mut [NodeRecord],
    suite: NodeIndex,
    reason: &str,
    at: Duration,
) -> CascadePlan {
    let mut plan = CascadePlan::default();
    let suite_id = graph.id(suite);

    match records[suite.index()].state() {
        state @ (NodeState::Starting | NodeState::Running) => {
            let record = &mut records[suite.index()];
            if record
                .terminate(Outcome::failure(FailureCause::RuntimeError, reason), at)
                .is_err()
            {
                return plan;
            }
            record.token().cancel();
            graph.release_relations_of(suite, records);
            plan.suite_marked = true;
            plan.best_effort_stop =
                state == NodeState::Running && graph.node(suite).operations.has_stop();
        }
        NodeState::Stopping => {
            records[suite.index()].record_failure(FailureCause::RuntimeError, reason);
        }
        NodeState::Waiting | NodeState::Terminated => {
            debug!(suite = suite_id, "failure reported for inactive suite, ignoring");
            return plan;
        }
    }

    let mut queue = VecDeque::from([suite]);
    let mut seen = HashSet::from([suite]);
    while let Some(failed) = queue.pop_front() {
        let failed_id = graph.id(failed);
        for dependent in graph.dependents_of(failed) {
            if !seen.insert(dependent) {
                continue;
            }
            let record = &mut records[dependent.index()];
            let state = record.state();
            if !matches!(
                state,
                NodeState::Waiting | NodeState::Starting | NodeState::Running
            ) {
                continue;
            }
            let message = format!("suite '{failed_id}' failed: {reason}");
            if record
                .terminate(
                    Outcome::failure(FailureCause::AbortedByDependency, message),
                    at,
                )
                .is_err()
            {
                continue;
            }
            record.token().cancel();
            graph.release_relations_of(dependent, records);
            warn!(
                node = graph.id(dependent),
                suite = failed_id,
                was = %state,
                "aborted by failing dependency"
            );
            plan.aborted.push(dependent);
            if graph.node(dependent).kind == NodeKind::Suite {
                queue.push_back(dependent);
            }
        }
    }

    plan
}
