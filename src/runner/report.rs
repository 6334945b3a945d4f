use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::result::{NodeResult, RunResult};

/// Serializable run result for emitter output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunMetadata,
    pub results: Vec<NodeReport>,
    pub summary: SummaryReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub name: String,
    pub duration_ms: u64,
}

/// One node's final record in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: String,
    pub kind: String,
    pub status: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub success: bool,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl From<&NodeResult> for NodeReport {
    fn from(result: &NodeResult) -> Self {
        let outcome = match result.outcome.cause() {
            Some(_) => "failure",
            None if result.outcome.is_success() => "success",
            None => "pending",
        };
        Self {
            node: result.node.clone(),
            kind: result.kind.to_string(),
            status: result.status().to_string(),
            outcome: outcome.to_owned(),
            cause: result.cause().map(|c| c.as_label().to_owned()),
            message: result.message().map(str::to_owned),
            started_ms: result.started_at.map(millis),
            running_ms: result.running_at.map(millis),
            terminated_ms: result.terminated_at.map(millis),
        }
    }
}

/// Convert a [`RunResult`] into a serializable [`RunReport`].
pub fn to_report(result: &RunResult) -> RunReport {
    RunReport {
        run: RunMetadata {
            name: result.name.clone(),
            duration_ms: millis(result.total_duration),
        },
        results: result.nodes.iter().map(NodeReport::from).collect(),
        summary: SummaryReport {
            total: result.summary.total,
            passed: result.summary.passed,
            failed: result.summary.failed,
            aborted: result.summary.aborted,
            success: result.summary.success(),
        },
    }
}
