//! The scheduler loop.
//!
//! One [`Scheduler`] owns every [`NodeRecord`] for the length of a run and is
//! the only writer of node state. Operations run as spawned tasks and report
//! back through a single channel; the loop applies each completion in arrival
//! order, then settles the graph: it dooms waiting nodes that can never start,
//! starts the ones that became ready, and tears down idle suites.
//!
//! ```text
//!   settle ──► launch start/run/stop ──► task ──► Event ──┐
//!     ▲                                                   │
//!     └──────────── on_completed / on_crashed ◄───────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use petgraph::graph::NodeIndex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::graph::{DependencyGraph, Readiness};
use crate::node::behavior::{Handles, NodeContext};
use crate::node::{FailureCause, NodeKind, NodeRecord, NodeState, Op, Outcome, Relation};
use crate::runner::cascade::{self, CascadePlan};
use crate::runner::config::RunConfig;
use crate::runner::event::{Event, OpResult};
use crate::runner::operation::{invoke, run_guarded};
use crate::runner::result::{NodeResult, RunResult};
use crate::runner::sink::ResultSink;

pub struct Scheduler {
    graph: DependencyGraph,
    config: RunConfig,
    records: Vec<NodeRecord>,
    sinks: Vec<Box<dyn ResultSink>>,
    tasks: JoinSet<()>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    started: Instant,
}

impl Scheduler {
    pub fn new(graph: DependencyGraph, config: RunConfig) -> Self {
        let records = graph
            .node_indices
            .iter()
            .map(|&idx| NodeRecord::new(graph.initial_refcount(idx), CancellationToken::new()))
            .collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            graph,
            config,
            records,
            sinks: Vec::new(),
            tasks: JoinSet::new(),
            events_tx,
            events_rx,
            started: Instant::now(),
        }
    }

    /// Add a sink receiving each node result as it terminates.
    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Drive every node to `terminated` and return the results.
    ///
    /// Per-node failures are recorded in the result; this never fails.
    pub async fn schedule(mut self) -> RunResult {
        self.started = Instant::now();
        info!(
            run = %self.graph.name,
            nodes = self.graph.len(),
            relations = self.graph.relation_count(),
            "run started"
        );

        self.settle();
        while self.live() > 0 {
            if self.tracked() == 0 {
                self.abort_stalled();
                break;
            }
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle(event);
            self.settle();
            self.reap();
        }

        self.drain().await;
        self.finish()
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn live(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.state().is_terminated())
            .count()
    }

    /// Operations whose completion will still drive a live node forward.
    fn tracked(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.state().is_terminated() && r.in_flight().is_some())
            .count()
    }

    fn handle(&mut self, event: Event) {
        debug!(node = self.graph.id(event.node()), ?event, "event");
        match event {
            Event::Completed { node, op, result } => self.on_completed(node, op, result),
            Event::Crashed { node, reason } => self.on_crashed(node, reason),
        }
    }

    /// Apply readiness and teardown rules until nothing changes.
    fn settle(&mut self) {
        loop {
            let mut progressed = false;
            for i in 0..self.records.len() {
                let idx = NodeIndex::new(i);
                match self.records[i].state() {
                    NodeState::Waiting => match self.graph.readiness(idx, &self.records) {
                        Readiness::Ready => {
                            self.advance(idx, NodeState::Starting);
                            self.launch(idx, Op::Start);
                            progressed = true;
                        }
                        Readiness::Doomed { cause, blocker } => {
                            let message = doomed_message(cause, self.graph.id(blocker));
                            self.terminate(idx, Outcome::failure(cause, message));
                            progressed = true;
                        }
                        Readiness::Blocked => {}
                    },
                    NodeState::Running
                        if self.graph.node(idx).kind == NodeKind::Suite
                            && self.records[i].refcount() == 0
                            && self.records[i].in_flight().is_none() =>
                    {
                        self.advance(idx, NodeState::Stopping);
                        self.launch(idx, Op::Stop);
                        progressed = true;
                    }
                    _ => {}
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn context_for(&self, idx: NodeIndex, token: CancellationToken) -> NodeContext {
        let handles: HashMap<String, _> = self
            .graph
            .uses_of(idx)
            .into_iter()
            .filter_map(|suite| {
                self.records[suite.index()]
                    .handle()
                    .map(|h| (self.graph.id(suite).to_owned(), h.clone()))
            })
            .collect();
        let node = self.graph.node(idx);
        NodeContext::new(
            idx,
            &node.id,
            node.kind,
            Handles::new(handles),
            token,
            self.events_tx.clone(),
        )
    }

    /// Launch `op` for `idx`. An absent operation completes immediately
    /// through the same channel, so ordering is preserved.
    fn launch(&mut self, idx: NodeIndex, op: Op) {
        let token = self.records[idx.index()].token().clone();
        let ctx = self.context_for(idx, token);
        self.dispatch(idx, op, ctx);
    }

    fn dispatch(&mut self, idx: NodeIndex, op: Op, ctx: NodeContext) {
        let handles = ctx.handles().clone();
        let node = self.graph.node(idx);
        let timeout = self.config.timeout_for(node.kind);
        let tx = self.events_tx.clone();

        let record = &mut self.records[idx.index()];
        if !record.state().is_terminated() {
            record.set_in_flight(Some(op));
        }

        match invoke(&node.operations, op, ctx, handles) {
            Some(fut) => {
                debug!(node = %node.id, %op, "launching");
                self.tasks.spawn(async move {
                    let result = run_guarded(fut, timeout).await;
                    // The receiver is gone once the run has finished.
                    let _ = tx.send(Event::Completed {
                        node: idx,
                        op,
                        result,
                    });
                });
            }
            None => {
                let _ = tx.send(Event::Completed {
                    node: idx,
                    op,
                    result: Ok(None),
                });
            }
        }
    }

    fn on_completed(&mut self, idx: NodeIndex, op: Op, result: OpResult) {
        let record = &self.records[idx.index()];
        if record.state().is_terminated() || record.in_flight() != Some(op) {
            debug!(
                node = self.graph.id(idx),
                %op,
                state = %record.state(),
                "ignoring result of settled operation"
            );
            return;
        }
        self.records[idx.index()].set_in_flight(None);
        let kind = self.graph.node(idx).kind;

        match (op, result) {
            (Op::Start, Ok(handle)) => {
                self.records[idx.index()].set_handle(handle);
                self.advance(idx, NodeState::Running);
                if kind == NodeKind::Test {
                    self.launch(idx, Op::Run);
                }
            }
            (Op::Start, Err(e)) => {
                warn!(node = self.graph.id(idx), error = %e, label = e.as_label(), "start failed");
                self.terminate(
                    idx,
                    Outcome::failure(FailureCause::SetupFailed, e.to_string()),
                );
            }
            (Op::Run, result) => {
                if let Err(e) = result {
                    warn!(node = self.graph.id(idx), error = %e, label = e.as_label(), "run failed");
                    self.records[idx.index()].record_failure(FailureCause::RunFailed, e.to_string());
                }
                self.advance(idx, NodeState::Stopping);
                self.launch(idx, Op::Stop);
            }
            (Op::Stop, result) => {
                if let Err(e) = result {
                    warn!(node = self.graph.id(idx), error = %e, label = e.as_label(), "stop failed");
                    self.records[idx.index()]
                        .record_failure(FailureCause::TeardownFailed, e.to_string());
                }
                let outcome = self.records[idx.index()]
                    .take_pending_failure()
                    .unwrap_or(Outcome::Success);
                self.terminate(idx, outcome);
            }
        }
    }

    fn on_crashed(&mut self, idx: NodeIndex, reason: String) {
        let id = self.graph.id(idx);
        let state = self.records[idx.index()].state();
        if !state.is_active() {
            debug!(node = id, %state, reason = %reason, "ignoring failure report from inactive node");
            return;
        }

        match self.graph.node(idx).kind {
            NodeKind::Test => {
                warn!(node = id, %state, reason = %reason, "test reported a runtime error");
                self.records[idx.index()].record_failure(FailureCause::RuntimeError, reason);
            }
            NodeKind::Suite => {
                warn!(node = id, %state, reason = %reason, "suite failed unexpectedly");
                let at = self.elapsed();
                let plan = cascade::on_suite_failure(&self.graph, &mut self.records, idx, &reason, at);
                self.apply_cascade(idx, plan);
            }
        }
    }

    fn apply_cascade(&mut self, suite: NodeIndex, plan: CascadePlan) {
        if !plan.aborted.is_empty() {
            warn!(
                suite = self.graph.id(suite),
                aborted = plan.aborted.len(),
                "cascading abort to dependents"
            );
        }
        if plan.suite_marked {
            self.emit(suite);
        }
        for &idx in &plan.aborted {
            self.emit(idx);
        }
        if plan.best_effort_stop {
            debug!(suite = self.graph.id(suite), "best-effort stop");
            // The suite's own token is already cancelled.
            let ctx = self.context_for(suite, CancellationToken::new());
            self.dispatch(suite, Op::Stop, ctx);
        }
    }

    fn advance(&mut self, idx: NodeIndex, to: NodeState) {
        let at = self.elapsed();
        match self.records[idx.index()].advance(to, at) {
            Ok(()) => info!(node = self.graph.id(idx), state = %to, "transition"),
            Err(e) => error!(node = self.graph.id(idx), error = %e, "rejected transition"),
        }
    }

    /// Terminate `idx`, release the suites it holds and report it.
    fn terminate(&mut self, idx: NodeIndex, outcome: Outcome) {
        let at = self.elapsed();
        if let Err(e) = self.records[idx.index()].terminate(outcome, at) {
            error!(node = self.graph.id(idx), error = %e, "rejected termination");
            return;
        }
        self.graph.release_relations_of(idx, &mut self.records);
        self.emit(idx);
    }

    fn emit(&mut self, idx: NodeIndex) {
        let node = self.graph.node(idx);
        let result = NodeResult::from_record(&node.id, node.kind, &self.records[idx.index()]);
        info!(node = %node.id, outcome = %result.outcome, "terminated");
        for sink in &mut self.sinks {
            sink.node_terminated(&result);
        }
    }

    /// Nothing is in flight yet live nodes remain: they can never progress.
    fn abort_stalled(&mut self) {
        let stalled: Vec<NodeIndex> = self
            .graph
            .node_indices
            .iter()
            .copied()
            .filter(|idx| !self.records[idx.index()].state().is_terminated())
            .collect();
        error!(stalled = stalled.len(), "scheduler stalled with live nodes");
        for idx in stalled {
            let state = self.records[idx.index()].state();
            self.records[idx.index()].token().cancel();
            self.terminate(
                idx,
                Outcome::failure(
                    FailureCause::RuntimeError,
                    format!("scheduler stalled while {state}"),
                ),
            );
        }
    }

    /// Release the slots of tasks that already finished.
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "operation task did not complete");
            }
        }
    }

    /// Wait for operations whose results are ignored, up to the drain timeout.
    async fn drain(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let deadline = time::sleep(self.config.drain_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = self.tasks.join_next() => {
                    if joined.is_none() {
                        return;
                    }
                }
                () = &mut deadline => {
                    warn!(
                        outstanding = self.tasks.len(),
                        "abandoning operations still running after drain timeout"
                    );
                    self.tasks.abort_all();
                    return;
                }
            }
        }
    }

    fn finish(mut self) -> RunResult {
        let nodes: Vec<NodeResult> = self
            .graph
            .node_indices
            .iter()
            .map(|&idx| {
                let node = self.graph.node(idx);
                NodeResult::from_record(&node.id, node.kind, &self.records[idx.index()])
            })
            .collect();
        let result = RunResult::new(self.graph.name.clone(), self.elapsed(), nodes);
        info!(
            run = %result.name,
            passed = result.summary.passed,
            failed = result.summary.failed,
            aborted = result.summary.aborted,
            "run complete"
        );
        for sink in &mut self.sinks {
            sink.run_finished(&result);
        }
        result
    }
}

fn doomed_message(cause: FailureCause, blocker: &str) -> String {
    match cause {
        FailureCause::OnlyAfterTargetFailed => {
            format!("{} target '{blocker}' did not succeed", Relation::OnlyAfter)
        }
        _ => format!("dependency '{blocker}' terminated before this node could start"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::graph::build;
    use crate::node::NodeSpec;
    use crate::node::behavior::OpError;
    use crate::runner::sink::CollectingSink;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: String) {
        log.lock().unwrap().push(entry);
    }

    fn position(log: &Log, entry: &str) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("'{entry}' missing from log"))
    }

    /// A node whose every operation appends `<id>.<op>` to the log.
    fn logged(node: NodeSpec, log: &Log) -> NodeSpec {
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        let node = node
            .on_start(move |ctx| {
                record(&l1, format!("{}.start", ctx.id()));
                async { Ok(None) }
            })
            .on_stop(move |ctx| {
                record(&l3, format!("{}.stop", ctx.id()));
                async { Ok(()) }
            });
        if node.kind == NodeKind::Test {
            node.on_run(move |ctx, _handles| {
                record(&l2, format!("{}.run", ctx.id()));
                async { Ok(()) }
            })
        } else {
            node
        }
    }

    async fn run_nodes(nodes: Vec<NodeSpec>) -> RunResult {
        Scheduler::new(build(nodes).unwrap(), RunConfig::default())
            .schedule()
            .await
    }

    #[tokio::test]
    async fn nodes_without_operations_all_succeed() {
        let result = run_nodes(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("A").uses("DB"),
            NodeSpec::test("B"),
        ])
        .await;
        assert!(result.success(), "{result:?}");
        assert_eq!(result.summary.total, 3);
    }

    #[tokio::test]
    async fn empty_graph_finishes_immediately() {
        let result = run_nodes(vec![]).await;
        assert_eq!(result.summary.total, 0);
        assert!(result.success());
    }

    #[tokio::test]
    async fn start_failure_dooms_waiting_holders() {
        let result = run_nodes(vec![
            NodeSpec::suite("DB").on_start(|_ctx| async { Err(OpError::failed("port 5432 in use")) }),
            NodeSpec::test("Connect").uses("DB"),
        ])
        .await;
        let db = result.node("DB").unwrap();
        assert_eq!(db.cause(), Some(FailureCause::SetupFailed));
        assert_eq!(db.message(), Some("port 5432 in use"));
        let connect = result.node("Connect").unwrap();
        assert_eq!(connect.cause(), Some(FailureCause::AbortedByDependency));
        assert!(connect.started_at.is_none());
    }

    #[tokio::test]
    async fn run_failure_still_stops_the_test() {
        let log: Log = Arc::default();
        let stops = log.clone();
        let result = run_nodes(vec![
            NodeSpec::test("T")
                .on_run(|_ctx, _h| async { Err(OpError::failed("assertion failed")) })
                .on_stop(move |_ctx| {
                    record(&stops, "T.stop".into());
                    async { Ok(()) }
                }),
        ])
        .await;
        let t = result.node("T").unwrap();
        assert_eq!(t.cause(), Some(FailureCause::RunFailed));
        assert_eq!(t.message(), Some("assertion failed"));
        assert_eq!(*log.lock().unwrap(), vec!["T.stop".to_owned()]);
    }

    #[tokio::test]
    async fn run_failure_wins_over_teardown_failure() {
        let result = run_nodes(vec![
            NodeSpec::test("T")
                .on_run(|_ctx, _h| async { Err(OpError::failed("first")) })
                .on_stop(|_ctx| async { Err(OpError::failed("second")) }),
        ])
        .await;
        assert_eq!(result.node("T").unwrap().message(), Some("first"));
    }

    #[tokio::test]
    async fn teardown_failure_is_reported() {
        let result = run_nodes(vec![
            NodeSpec::suite("DB").on_stop(|_ctx| async { Err(OpError::failed("volume busy")) }),
        ])
        .await;
        assert_eq!(
            result.node("DB").unwrap().cause(),
            Some(FailureCause::TeardownFailed)
        );
    }

    #[tokio::test]
    async fn hung_start_times_out() {
        let config = RunConfig {
            suite_timeout: Some(Duration::from_millis(20)),
            drain_timeout: Duration::ZERO,
            ..RunConfig::default()
        };
        let graph = build(vec![NodeSpec::suite("DB").on_start(|_ctx| async {
            time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        })])
        .unwrap();
        let result = Scheduler::new(graph, config).schedule().await;
        let db = result.node("DB").unwrap();
        assert_eq!(db.cause(), Some(FailureCause::SetupFailed));
        assert_eq!(db.message(), Some("timed out after 20ms"));
    }

    #[tokio::test]
    async fn panicking_run_is_a_run_failure() {
        let result = run_nodes(vec![NodeSpec::test("T").on_run(|_ctx, _h| async {
            if true {
                panic!("index out of bounds");
            }
            Ok(())
        })])
        .await;
        let t = result.node("T").unwrap();
        assert_eq!(t.cause(), Some(FailureCause::RunFailed));
        assert_eq!(t.message(), Some("panicked: index out of bounds"));
    }

    #[tokio::test]
    async fn run_slot_panicking_before_its_future_is_a_run_failure() {
        let result = run_nodes(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("T").uses("DB").on_run(|_ctx, _h| {
                if true {
                    panic!("sync part");
                }
                async { Ok(()) }
            }),
        ])
        .await;
        let t = result.node("T").unwrap();
        assert_eq!(t.cause(), Some(FailureCause::RunFailed));
        assert_eq!(t.message(), Some("panicked: sync part"));
        assert!(result.node("DB").unwrap().outcome.is_success());
    }

    #[tokio::test]
    async fn best_effort_stop_of_crashed_suite_is_not_aborted() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let stop_log = log.clone();
        let result = run_nodes(vec![
            NodeSpec::suite("DB")
                .on_start(|ctx| async move {
                    let handle: crate::node::behavior::Handle = Arc::new(ctx);
                    Ok(Some(handle))
                })
                .on_stop(move |ctx| {
                    record(&stop_log, format!("stop aborted={}", ctx.is_aborted()));
                    async { Ok(()) }
                }),
            NodeSpec::test("T").uses("DB").on_run(|ctx, handles| async move {
                if let Some(db) = handles.get::<NodeContext>("DB") {
                    db.report_failure("died");
                }
                ctx.cancellation().cancelled().await;
                Ok(())
            }),
        ])
        .await;

        assert_eq!(*log.lock().unwrap(), vec!["stop aborted=false".to_owned()]);
        let db = result.node("DB").unwrap();
        assert_eq!(db.cause(), Some(FailureCause::RuntimeError));
        assert_eq!(db.message(), Some("died"));
        assert_eq!(
            result.node("T").unwrap().cause(),
            Some(FailureCause::AbortedByDependency)
        );
    }

    #[tokio::test]
    async fn finished_tasks_are_reaped_while_running() {
        let mut scheduler = Scheduler::new(build(vec![]).unwrap(), RunConfig::default());
        for _ in 0..3 {
            scheduler.tasks.spawn(async {});
        }
        scheduler.tasks.spawn(std::future::pending::<()>());
        time::sleep(Duration::from_millis(20)).await;

        scheduler.reap();
        assert_eq!(scheduler.tasks.len(), 1);
        scheduler.tasks.abort_all();
    }

    #[tokio::test]
    async fn test_crash_report_fails_only_that_test() {
        let result = run_nodes(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("Flaky").uses("DB").on_run(|ctx, _h| async move {
                ctx.report_failure("worker thread died");
                Ok(())
            }),
            NodeSpec::test("Steady").uses("DB"),
        ])
        .await;
        assert_eq!(
            result.node("Flaky").unwrap().cause(),
            Some(FailureCause::RuntimeError)
        );
        assert!(result.node("Steady").unwrap().outcome.is_success());
        assert!(result.node("DB").unwrap().outcome.is_success());
    }

    #[tokio::test]
    async fn stop_runs_after_every_dependent_terminates() {
        let log: Log = Arc::default();
        let result = run_nodes(vec![
            logged(NodeSpec::suite("DB"), &log),
            logged(NodeSpec::test("A").uses("DB"), &log),
            logged(NodeSpec::test("B").depends("DB"), &log),
        ])
        .await;
        assert!(result.success());
        let stop = position(&log, "DB.stop");
        assert!(position(&log, "A.stop") < stop);
        assert!(position(&log, "B.stop") < stop);
        assert!(position(&log, "DB.start") < position(&log, "A.start"));
    }

    #[tokio::test]
    async fn sink_receives_each_node_once() {
        let sink = CollectingSink::new();
        let graph = build(vec![
            NodeSpec::suite("DB"),
            NodeSpec::test("A").uses("DB"),
            NodeSpec::test("B").only_after("A"),
        ])
        .unwrap();
        let result = Scheduler::new(graph, RunConfig::default())
            .with_sink(sink.clone())
            .schedule()
            .await;
        let mut seen: Vec<String> = sink.results().into_iter().map(|r| r.node).collect();
        seen.sort();
        assert_eq!(seen, vec!["A", "B", "DB"]);
        for collected in sink.results() {
            assert_eq!(Some(&collected), result.node(&collected.node));
        }
    }

    #[test]
    fn doomed_messages_name_the_blocker() {
        assert_eq!(
            doomed_message(FailureCause::OnlyAfterTargetFailed, "Connect"),
            "onlyAfter target 'Connect' did not succeed"
        );
        assert!(doomed_message(FailureCause::AbortedByDependency, "DB").contains("'DB'"));
    }
}
