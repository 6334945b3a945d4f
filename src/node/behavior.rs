//! Node behavior: the three asynchronous operations a node exposes to the
//! scheduler, the context handed to them, and the handles passed along
//! `uses` relations.
//!
//! Operations are stored as optional slots. An absent slot is treated by the
//! scheduler as an operation that succeeds immediately, so a suite without a
//! `stop` tears down instantly and a test without a `run` passes trivially.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use petgraph::graph::NodeIndex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::node::NodeKind;
use crate::runner::event::Event;

/// Opaque handle produced by a suite's `start` and shared with its `uses` dependents.
pub type Handle = Arc<dyn Any + Send + Sync>;

pub type StartFn =
    Arc<dyn Fn(NodeContext) -> BoxFuture<'static, Result<Option<Handle>, OpError>> + Send + Sync>;
pub type RunFn =
    Arc<dyn Fn(NodeContext, Handles) -> BoxFuture<'static, Result<(), OpError>> + Send + Sync>;
pub type StopFn = Arc<dyn Fn(NodeContext) -> BoxFuture<'static, Result<(), OpError>> + Send + Sync>;

/// Failure of a single start/run/stop operation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// The operation reported failure.
    #[error("{reason}")]
    Failed { reason: String },

    /// The operation did not resolve within the configured timeout.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The operation panicked.
    #[error("panicked: {message}")]
    Panicked { message: String },
}

impl OpError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "op_failed",
            Self::Timeout { .. } => "op_timeout",
            Self::Panicked { .. } => "op_panicked",
        }
    }
}

/// Handles of the suites a node `uses`, keyed by suite id.
#[derive(Clone, Default)]
pub struct Handles {
    inner: Arc<HashMap<String, Handle>>,
}

impl Handles {
    pub fn new(handles: HashMap<String, Handle>) -> Self {
        Self {
            inner: Arc::new(handles),
        }
    }

    /// Typed access to a suite handle. Returns `None` if the suite produced
    /// no handle or the handle is of a different type.
    pub fn get<T: Any + Send + Sync>(&self, suite: &str) -> Option<Arc<T>> {
        let handle = self.inner.get(suite)?;
        Arc::clone(handle).downcast::<T>().ok()
    }

    pub fn raw(&self, suite: &str) -> Option<&Handle> {
        self.inner.get(suite)
    }

    pub fn contains(&self, suite: &str) -> bool {
        self.inner.contains_key(suite)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Handles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_tuple("Handles").field(&keys).finish()
    }
}

/// Context passed to every node operation.
///
/// Cloning is cheap. A suite may keep a clone alive after `start` returns and
/// call [`NodeContext::report_failure`] from a watcher task when the service
/// it manages dies unexpectedly.
#[derive(Clone)]
pub struct NodeContext {
    index: NodeIndex,
    id: Arc<str>,
    kind: NodeKind,
    handles: Handles,
    token: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
}

impl NodeContext {
    pub(crate) fn new(
        index: NodeIndex,
        id: &str,
        kind: NodeKind,
        handles: Handles,
        token: CancellationToken,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            index,
            id: Arc::from(id),
            kind,
            handles,
            token,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Handles of this node's `uses` targets.
    pub fn handles(&self) -> &Handles {
        &self.handles
    }

    /// Cancelled when the node is force-aborted: by a failing dependency,
    /// or for a suite, when it reports its own failure. Outstanding
    /// operations may watch it to wind down early; their results are
    /// ignored either way. The best-effort stop of a failed suite gets a
    /// fresh token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Report that the service behind this node failed outside of any
    /// operation call. Returns `false` once the run has finished.
    pub fn report_failure(&self, reason: impl Into<String>) -> bool {
        self.events
            .send(Event::Crashed {
                node: self.index,
                reason: reason.into(),
            })
            .is_ok()
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("handles", &self.handles)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Trait-based alternative to closures for node operations.
///
/// Every method defaults to an immediate success.
#[async_trait]
pub trait Behavior: Send + Sync + 'static {
    async fn start(&self, _ctx: &NodeContext) -> Result<Option<Handle>, OpError> {
        Ok(None)
    }

    async fn run(&self, _ctx: &NodeContext, _handles: &Handles) -> Result<(), OpError> {
        Ok(())
    }

    async fn stop(&self, _ctx: &NodeContext) -> Result<(), OpError> {
        Ok(())
    }
}

/// The optional `start`, `run` and `stop` slots of a node.
#[derive(Clone, Default)]
pub struct Operations {
    pub(crate) start: Option<StartFn>,
    pub(crate) run: Option<RunFn>,
    pub(crate) stop: Option<StopFn>,
}

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Handle>, OpError>> + Send + 'static,
    {
        self.start = Some(Arc::new(move |ctx| f(ctx).boxed()));
        self
    }

    pub fn on_run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeContext, Handles) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OpError>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |ctx, handles| f(ctx, handles).boxed()));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OpError>> + Send + 'static,
    {
        self.stop = Some(Arc::new(move |ctx| f(ctx).boxed()));
        self
    }

    /// Adapt a [`Behavior`] into operation slots. Suites get no `run` slot.
    pub fn from_behavior<B: Behavior>(kind: NodeKind, behavior: Arc<B>) -> Self {
        let starter = Arc::clone(&behavior);
        let stopper = Arc::clone(&behavior);
        let ops = Self::new()
            .on_start(move |ctx| {
                let b = Arc::clone(&starter);
                async move { b.start(&ctx).await }
            })
            .on_stop(move |ctx| {
                let b = Arc::clone(&stopper);
                async move { b.stop(&ctx).await }
            });
        match kind {
            NodeKind::Suite => ops,
            NodeKind::Test => ops.on_run(move |ctx, handles| {
                let b = Arc::clone(&behavior);
                async move { b.run(&ctx, &handles).await }
            }),
        }
    }

    pub fn has_start(&self) -> bool {
        self.start.is_some()
    }

    pub fn has_run(&self) -> bool {
        self.run.is_some()
    }

    pub fn has_stop(&self) -> bool {
        self.stop.is_some()
    }
}

impl fmt::Debug for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operations")
            .field("start", &self.has_start())
            .field("run", &self.has_run())
            .field("stop", &self.has_stop())
            .finish()
    }
}
