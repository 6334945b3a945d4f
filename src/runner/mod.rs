pub mod cascade;
pub mod config;
pub mod display;
pub mod event;
pub(crate) mod operation;
pub mod report;
pub mod result;
pub mod scheduler;
pub mod sink;

pub use config::RunConfig;
pub use result::{NodeResult, NodeStatus, RunResult, RunSummary};
pub use scheduler::Scheduler;
pub use sink::{CollectingSink, LogSink, ResultSink};

use crate::graph::{self, GraphError};
use crate::node::NodeSpec;

/// Build the dependency graph for `nodes` and schedule it to completion.
///
/// # Errors
///
/// Returns the graph construction error if the nodes do not form a valid
/// graph. Nothing is started in that case.
pub async fn run(nodes: Vec<NodeSpec>, config: RunConfig) -> Result<RunResult, GraphError> {
    let graph = graph::build(nodes)?;
    Ok(Scheduler::new(graph, config).schedule().await)
}
