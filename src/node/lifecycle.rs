use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::node::behavior::Handle;

/// Lifecycle state of a node. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Waiting,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl NodeState {
    /// Started but not yet terminated.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn is_terminated(self) -> bool {
        self == Self::Terminated
    }

    /// Whether `advance` may move from `self` to `to`. Termination is
    /// handled separately by [`NodeRecord::terminate`].
    pub fn can_advance_to(self, to: NodeState) -> bool {
        matches!(
            (self, to),
            (Self::Waiting, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Running, Self::Stopping)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why a node terminated with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureCause {
    #[serde(rename = "setup-failed")]
    SetupFailed,
    #[serde(rename = "run-failed")]
    RunFailed,
    #[serde(rename = "runtime-error")]
    RuntimeError,
    #[serde(rename = "teardown-failed")]
    TeardownFailed,
    #[serde(rename = "aborted-by-dependency")]
    AbortedByDependency,
    #[serde(rename = "onlyAfter-target-failed")]
    OnlyAfterTargetFailed,
}

impl FailureCause {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::SetupFailed => "setup-failed",
            Self::RunFailed => "run-failed",
            Self::RuntimeError => "runtime-error",
            Self::TeardownFailed => "teardown-failed",
            Self::AbortedByDependency => "aborted-by-dependency",
            Self::OnlyAfterTargetFailed => "onlyAfter-target-failed",
        }
    }

    /// Failures imposed from outside the node rather than by its own operations.
    pub fn is_abort(self) -> bool {
        matches!(self, Self::AbortedByDependency | Self::OnlyAfterTargetFailed)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Final result of a node. Set exactly once, on termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Success,
    Failure { cause: FailureCause, message: String },
}

impl Outcome {
    pub fn failure(cause: FailureCause, message: impl Into<String>) -> Self {
        Self::Failure {
            cause,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn cause(&self) -> Option<FailureCause> {
        match self {
            Self::Failure { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Failure { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure { cause, message } => write!(f, "failure[{cause}]: {message}"),
        }
    }
}

/// One of the three node operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Start,
    Run,
    Stop,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Run => write!(f, "run"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: NodeState, to: NodeState },

    #[error("cannot terminate with a pending outcome")]
    PendingOutcome,

    #[error("cannot terminate successfully from {from}")]
    SuccessFrom { from: NodeState },
}

/// Mutable per-node state, owned by the scheduler for the length of a run.
#[derive(Debug)]
pub struct NodeRecord {
    state: NodeState,
    outcome: Outcome,
    refcount: usize,
    handle: Option<Handle>,
    in_flight: Option<Op>,
    pending_failure: Option<(FailureCause, String)>,
    token: CancellationToken,
    started_at: Option<Duration>,
    running_at: Option<Duration>,
    terminated_at: Option<Duration>,
}

impl NodeRecord {
    pub fn new(refcount: usize, token: CancellationToken) -> Self {
        Self {
            state: NodeState::Waiting,
            outcome: Outcome::Pending,
            refcount,
            handle: None,
            in_flight: None,
            pending_failure: None,
            token,
            started_at: None,
            running_at: None,
            terminated_at: None,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }

    pub fn set_handle(&mut self, handle: Option<Handle>) {
        self.handle = handle;
    }

    pub fn in_flight(&self) -> Option<Op> {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, op: Option<Op>) {
        self.in_flight = op;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn started_at(&self) -> Option<Duration> {
        self.started_at
    }

    pub fn running_at(&self) -> Option<Duration> {
        self.running_at
    }

    pub fn terminated_at(&self) -> Option<Duration> {
        self.terminated_at
    }

    /// Move forward along waiting -> starting -> running -> stopping.
    /// `at` is the offset from run start.
    pub fn advance(&mut self, to: NodeState, at: Duration) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(to) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to,
            });
        }
        match to {
            NodeState::Starting => self.started_at = Some(at),
            NodeState::Running => self.running_at = Some(at),
            _ => {}
        }
        self.state = to;
        Ok(())
    }

    /// Enter `terminated` with a final outcome. Success is only reachable
    /// from `stopping`; the handle is dropped.
    pub fn terminate(&mut self, outcome: Outcome, at: Duration) -> Result<(), TransitionError> {
        if self.state.is_terminated() {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: NodeState::Terminated,
            });
        }
        match &outcome {
            Outcome::Pending => return Err(TransitionError::PendingOutcome),
            Outcome::Success if self.state != NodeState::Stopping => {
                return Err(TransitionError::SuccessFrom { from: self.state });
            }
            _ => {}
        }
        self.state = NodeState::Terminated;
        self.outcome = outcome;
        self.terminated_at = Some(at);
        self.handle = None;
        self.in_flight = None;
        Ok(())
    }

    /// Drop one holder. Returns the remaining count; never goes below zero.
    pub fn release(&mut self) -> usize {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    /// Remember a failure to report once the node terminates. The first one wins.
    pub fn record_failure(&mut self, cause: FailureCause, message: impl Into<String>) {
        if self.pending_failure.is_none() {
            self.pending_failure = Some((cause, message.into()));
        }
    }

    pub fn has_pending_failure(&self) -> bool {
        self.pending_failure.is_some()
    }

    pub fn take_pending_failure(&mut self) -> Option<Outcome> {
        self.pending_failure
            .take()
            .map(|(cause, message)| Outcome::Failure { cause, message })
    }
}
