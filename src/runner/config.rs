use std::time::Duration;

use crate::node::NodeKind;

/// Configuration for a single scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Per-operation timeout for tests. `None` waits indefinitely.
    pub test_timeout: Option<Duration>,
    /// Per-operation timeout for suites. `None` waits indefinitely.
    pub suite_timeout: Option<Duration>,
    /// How long to wait for operations whose results will be ignored
    /// (aborted nodes, best-effort stops) once every node has terminated.
    pub drain_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_timeout: Some(Duration::from_secs(15)),
            suite_timeout: Some(Duration::from_secs(60)),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl RunConfig {
    /// Timeout applying to any start/run/stop of a node of `kind`.
    pub fn timeout_for(&self, kind: NodeKind) -> Option<Duration> {
        match kind {
            NodeKind::Test => self.test_timeout,
            NodeKind::Suite => self.suite_timeout,
        }
    }

    /// No timeouts and no drain wait.
    pub fn unbounded() -> Self {
        Self {
            test_timeout: None,
            suite_timeout: None,
            drain_timeout: Duration::ZERO,
        }
    }
}
