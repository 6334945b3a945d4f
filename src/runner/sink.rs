use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::runner::result::{NodeResult, NodeStatus, RunResult};

/// Receives node results as the scheduler terminates them.
///
/// `node_terminated` is called exactly once per node, from the scheduler loop.
pub trait ResultSink: Send {
    fn node_terminated(&mut self, result: &NodeResult);

    fn run_finished(&mut self, _result: &RunResult) {}
}

/// Collects results into a shared list, readable while the run is in progress.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    results: Arc<Mutex<Vec<NodeResult>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything collected so far, in termination order.
    pub fn results(&self) -> Vec<NodeResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for CollectingSink {
    fn node_terminated(&mut self, result: &NodeResult) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
    }
}

/// Logs one line per terminated node.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn node_terminated(&mut self, result: &NodeResult) {
        let duration_ms = result.duration().as_millis() as u64;
        match result.status() {
            NodeStatus::Passed => info!(node = %result.node, kind = %result.kind, duration_ms, "passed"),
            status => warn!(
                node = %result.node,
                kind = %result.kind,
                %status,
                cause = result.cause().map(|c| c.as_label()).unwrap_or("-"),
                message = result.message().unwrap_or(""),
                "did not pass"
            ),
        }
    }

    fn run_finished(&mut self, result: &RunResult) {
        info!(
            run = %result.name,
            total = result.summary.total,
            passed = result.summary.passed,
            failed = result.summary.failed,
            aborted = result.summary.aborted,
            "run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::node::{NodeKind, Outcome};

    fn passed(node: &str) -> NodeResult {
        NodeResult {
            node: node.into(),
            kind: NodeKind::Suite,
            outcome: Outcome::Success,
            started_at: Some(Duration::ZERO),
            running_at: Some(Duration::ZERO),
            terminated_at: Some(Duration::from_millis(3)),
        }
    }

    #[test]
    fn collecting_sink_shares_results_across_clones() {
        let sink = CollectingSink::new();
        let mut writer = sink.clone();
        writer.node_terminated(&passed("DB"));
        writer.node_terminated(&passed("Cache"));
        let nodes: Vec<String> = sink.results().into_iter().map(|r| r.node).collect();
        assert_eq!(nodes, vec!["DB", "Cache"]);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn log_sink_accepts_any_result() {
        let mut sink = LogSink;
        sink.node_terminated(&passed("DB"));
        sink.run_finished(&RunResult::new("r", Duration::ZERO, vec![passed("DB")]));
    }
}
