use crate::runner::result::{NodeResult, NodeStatus, RunResult};

/// Format a status label for terminal output.
fn status_label(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Passed => "PASSED",
        NodeStatus::Failed => "FAILED",
        NodeStatus::Aborted => "ABORTED",
        NodeStatus::Pending => "PENDING",
    }
}

/// Format a node result line, with the failure cause and message beneath it.
pub fn format_node_result(result: &NodeResult) -> String {
    let status = status_label(result.status());
    let duration_secs = result.duration().as_secs_f64();
    let mut line = format!(
        "  [{status}] {} {} ({:.1}s)",
        result.kind, result.node, duration_secs
    );

    if let (Some(cause), Some(message)) = (result.cause(), result.message()) {
        line.push_str(&format!("\n         → {cause}: {message}"));
    }

    line
}

/// Format the final summary after all nodes terminated.
pub fn format_summary(result: &RunResult) -> String {
    let duration_secs = result.total_duration.as_secs_f64();
    let mut parts = Vec::new();

    if result.summary.passed > 0 {
        parts.push(format!("{} passed", result.summary.passed));
    }
    if result.summary.failed > 0 {
        parts.push(format!("{} failed", result.summary.failed));
    }
    if result.summary.aborted > 0 {
        parts.push(format!("{} aborted", result.summary.aborted));
    }

    if parts.is_empty() {
        parts.push("0 nodes".into());
    }

    format!("\nResults: {} ({:.1}s)", parts.join(", "), duration_secs)
}

/// Format the run header line.
pub fn format_run_header(run_name: &str, nodes: usize) -> String {
    format!("Running {run_name} ({nodes} nodes)...\n")
}

/// Header, one line per node in declaration order, then the summary.
pub fn format_run(result: &RunResult) -> String {
    let mut out = format_run_header(&result.name, result.summary.total);
    for node in &result.nodes {
        out.push_str(&format_node_result(node));
        out.push('\n');
    }
    out.push_str(&format_summary(result));
    out.push('\n');
    out
}
