use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::graph::builder::DependencyGraph;
use crate::node::{FailureCause, NodeRecord, NodeState, Relation};

/// Whether a waiting node may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Some prerequisite has not reached the required state yet.
    Blocked,
    /// The node can never start. `blocker` is the prerequisite responsible.
    Doomed {
        cause: FailureCause,
        blocker: NodeIndex,
    },
}

impl DependencyGraph {
    /// Evaluate readiness of `idx` against current node records.
    ///
    /// Ready iff every `uses`/`depends` target is running and every
    /// `onlyAfter` target terminated with success. Doomed if an `onlyAfter`
    /// target terminated with failure, or a held suite is already past
    /// `running`.
    pub fn readiness(&self, idx: NodeIndex, records: &[NodeRecord]) -> Readiness {
        let mut blocked = false;
        for (relation, target) in self.prerequisites_of(idx) {
            let record = &records[target.index()];
            match relation {
                Relation::OnlyAfter => match record.state() {
                    NodeState::Terminated if record.outcome().is_success() => {}
                    NodeState::Terminated => {
                        return Readiness::Doomed {
                            cause: FailureCause::OnlyAfterTargetFailed,
                            blocker: target,
                        };
                    }
                    _ => blocked = true,
                },
                Relation::Uses | Relation::Depends => match record.state() {
                    NodeState::Running => {}
                    NodeState::Stopping | NodeState::Terminated => {
                        return Readiness::Doomed {
                            cause: FailureCause::AbortedByDependency,
                            blocker: target,
                        };
                    }
                    NodeState::Waiting | NodeState::Starting => blocked = true,
                },
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    pub fn ready_to_start(&self, idx: NodeIndex, records: &[NodeRecord]) -> bool {
        self.readiness(idx, records) == Readiness::Ready
    }

    /// Nodes holding a `uses` or `depends` relation on `idx`, in index order.
    pub fn dependents_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().holds_target())
            .map(|e| e.target())
            .collect();
        dependents.sort_unstable();
        dependents
    }

    /// Suites `idx` receives a handle from.
    pub fn uses_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.targets_by(idx, |r| r == Relation::Uses)
    }

    /// Suites `idx` keeps alive: its `uses` and `depends` targets.
    pub fn held_by(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.targets_by(idx, Relation::holds_target)
    }

    pub fn only_after_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.targets_by(idx, |r| r == Relation::OnlyAfter)
    }

    fn targets_by(&self, idx: NodeIndex, keep: impl Fn(Relation) -> bool) -> Vec<NodeIndex> {
        self.prerequisites_of(idx)
            .into_iter()
            .filter(|(relation, _)| keep(*relation))
            .map(|(_, target)| target)
            .collect()
    }

    /// Refcount a suite starts the run with: one per distinct holder.
    /// Counting holders that have not started yet keeps the suite up for
    /// dependents still waiting on an `onlyAfter`.
    pub fn initial_refcount(&self, idx: NodeIndex) -> usize {
        self.dependents_of(idx).len()
    }

    /// Decrement the refcount of every suite `idx` holds. Called once, when
    /// `idx` terminates. Returns the suites whose count reached zero.
    pub fn release_relations_of(
        &self,
        idx: NodeIndex,
        records: &mut [NodeRecord],
    ) -> Vec<NodeIndex> {
        self.held_by(idx)
            .into_iter()
            .filter(|target| records[target.index()].release() == 0)
            .collect()
    }
}
