use std::fmt::Write;

use crate::runner::report::RunReport;

/// Emit run results as YAML.
pub fn emit_run_yaml(report: &RunReport) -> String {
    serde_yaml::to_string(report).unwrap_or_else(|e| format!("# Error serializing report: {e}"))
}

/// Emit run results as JSON.
pub fn emit_run_json(report: &RunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{ \"error\": \"{e}\" }}"))
}

/// Emit run results as JUnit XML, one testcase per node.
///
/// Nodes that failed through their own operations become `<failure>`;
/// aborted nodes become `<skipped>` with the cause as message.
pub fn emit_run_junit(report: &RunReport) -> String {
    let mut out = String::new();
    let name = xml_escape(&report.run.name);
    let tests = report.summary.total;
    let failures = report.summary.failed;
    let skipped = report.summary.aborted;
    let time_secs = report.run.duration_ms as f64 / 1000.0;

    // Writing into a String cannot fail.
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        out,
        r#"<testsuite name="{name}" tests="{tests}" failures="{failures}" skipped="{skipped}" time="{time_secs:.1}">"#
    );

    for node in &report.results {
        let id = xml_escape(&node.node);
        let node_time = match (node.started_ms, node.terminated_ms) {
            (Some(start), Some(end)) => end.saturating_sub(start) as f64 / 1000.0,
            _ => 0.0,
        };
        let _ = writeln!(
            out,
            r#"  <testcase name="{id}" classname="{name}.{}" time="{node_time:.1}">"#,
            node.kind
        );
        let message = xml_escape(node.message.as_deref().unwrap_or(""));
        let cause = xml_escape(node.cause.as_deref().unwrap_or(""));
        match node.status.as_str() {
            "failed" => {
                let _ = writeln!(out, r#"    <failure message="{message}" type="{cause}"/>"#);
            }
            "aborted" => {
                let _ = writeln!(out, r#"    <skipped message="{cause}: {message}"/>"#);
            }
            _ => {}
        }
        let _ = writeln!(out, "  </testcase>");
    }

    let _ = writeln!(out, "</testsuite>");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::node::{FailureCause, NodeKind, Outcome};
    use crate::runner::report::to_report;
    use crate::runner::result::{NodeResult, RunResult};

    fn node(id: &str, outcome: Outcome) -> NodeResult {
        NodeResult {
            node: id.into(),
            kind: NodeKind::Test,
            outcome,
            started_at: Some(Duration::from_millis(0)),
            running_at: Some(Duration::from_millis(10)),
            terminated_at: Some(Duration::from_millis(1500)),
        }
    }

    fn report() -> RunReport {
        to_report(&RunResult::new(
            "Scenario",
            Duration::from_millis(1600),
            vec![
                node("Connect", Outcome::failure(FailureCause::RunFailed, "got <nil>")),
                node(
                    "Query",
                    Outcome::failure(FailureCause::OnlyAfterTargetFailed, "Connect"),
                ),
                node("Ping", Outcome::Success),
            ],
        ))
    }

    #[test]
    fn yaml_includes_causes() {
        let yaml = emit_run_yaml(&report());
        assert!(yaml.contains("name: Scenario"));
        assert!(yaml.contains("cause: run-failed"));
        assert!(yaml.contains("cause: onlyAfter-target-failed"));
    }

    #[test]
    fn json_round_trips() {
        let original = report();
        let json = emit_run_json(&original);
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn junit_maps_statuses() {
        let xml = emit_run_junit(&report());
        assert!(xml.contains(r#"tests="3" failures="1" skipped="1""#));
        assert!(xml.contains(r#"<failure message="got &lt;nil&gt;" type="run-failed"/>"#));
        assert!(xml.contains(r#"<skipped message="onlyAfter-target-failed: Connect"/>"#));
        assert!(xml.contains(r#"<testcase name="Ping" classname="Scenario.test" time="1.5">"#));
    }
}
