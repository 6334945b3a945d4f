use std::path::{Path, PathBuf};

use crate::emit::dot::emit_dot;
use crate::emit::mermaid::emit_mermaid;
use crate::emit::run_result::{emit_run_json, emit_run_junit, emit_run_yaml};
use crate::graph::traversal::start_order;
use crate::graph::{DependencyGraph, build};
use crate::plan::registry::BehaviorRegistry;
use crate::plan::load;
use crate::runner::display::format_run;
use crate::runner::report::to_report;
use crate::runner::{LogSink, RunConfig, RunResult, Scheduler};

/// Load a run spec file, resolve behaviors and build its graph.
fn load_graph(
    file: &Path,
    registry: &BehaviorRegistry,
) -> Result<(DependencyGraph, RunConfig), String> {
    let spec = load(file).map_err(|e| e.to_string())?;
    let name = spec.name.clone();
    let config = spec.run_config();
    let nodes = spec
        .into_nodes(registry)
        .map_err(|e| format!("{}: {e}", file.display()))?;
    let graph = build(nodes).map_err(|e| format!("{}: {e}", file.display()))?;
    Ok((graph.named(name), config))
}

fn write_or_return(output: Option<&PathBuf>, contents: String, what: &str) -> Result<String, String> {
    if let Some(out_path) = output {
        std::fs::write(out_path, &contents)
            .map_err(|e| format!("failed to write {}: {e}", out_path.display()))?;
        Ok(format!("{what} written to {}\n", out_path.display()))
    } else {
        Ok(contents)
    }
}

/// Run the `validate` command: load run specs and check their graphs.
///
/// # Errors
///
/// Returns an error string if a file cannot be loaded or its graph is invalid.
pub fn run_validate(files: &[PathBuf]) -> Result<String, String> {
    let registry = BehaviorRegistry::builtin();
    let mut results = Vec::new();

    for file in files {
        let (graph, _) = load_graph(file, &registry)?;
        results.push(format!(
            "{}: {} is valid ({} nodes, {} relations)",
            file.display(),
            graph.name,
            graph.len(),
            graph.relation_count(),
        ));
    }

    Ok(results.join("\n"))
}

/// Run the `graph` command: render dependency graphs as diagrams.
///
/// # Errors
///
/// Returns an error string if loading fails, the format is unknown, or the
/// output file cannot be written.
pub fn run_graph(files: &[PathBuf], format: &str, output: Option<&PathBuf>) -> Result<String, String> {
    let registry = BehaviorRegistry::builtin();
    let mut all_output = String::new();

    for file in files {
        let (graph, _) = load_graph(file, &registry)?;
        let diagram = match format {
            "dot" => emit_dot(&graph),
            "mermaid" => emit_mermaid(&graph),
            other => return Err(format!("unknown format '{other}' (expected: dot, mermaid)")),
        };
        all_output.push_str(&diagram);
    }

    write_or_return(output, all_output, "diagram")
}

/// Run the `order` command: list nodes in a valid start order.
///
/// # Errors
///
/// Returns an error string if a file cannot be loaded or its graph is invalid.
pub fn run_order(files: &[PathBuf]) -> Result<String, String> {
    let registry = BehaviorRegistry::builtin();
    let mut lines = Vec::new();

    for file in files {
        let (graph, _) = load_graph(file, &registry)?;
        lines.push(format!("{}:", graph.name));
        for (i, idx) in start_order(&graph).into_iter().enumerate() {
            let node = graph.node(idx);
            let prereqs: Vec<String> = graph
                .prerequisites_of(idx)
                .into_iter()
                .map(|(relation, target)| format!("{relation} {}", graph.id(target)))
                .collect();
            if prereqs.is_empty() {
                lines.push(format!("  {}. {} ({})", i + 1, node.id, node.kind));
            } else {
                lines.push(format!(
                    "  {}. {} ({}) [{}]",
                    i + 1,
                    node.id,
                    node.kind,
                    prereqs.join(", ")
                ));
            }
        }
    }

    Ok(lines.join("\n") + "\n")
}

/// Options for the `dry-run` command.
pub struct DryRunOptions {
    pub files: Vec<PathBuf>,
    pub format: String,
    pub output: Option<PathBuf>,
}

impl Default for DryRunOptions {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            format: "text".to_owned(),
            output: None,
        }
    }
}

/// Run the `dry-run` command: schedule every run spec with its declared
/// behaviors (built-in simulations only) and emit the results.
///
/// Returns `Ok(true)` if every node of every run succeeded.
///
/// # Errors
///
/// Returns an error string if loading fails, the format is unknown, the
/// runtime cannot be created or the output cannot be written.
pub fn run_dry(options: &DryRunOptions) -> Result<bool, String> {
    let emit: fn(&RunResult) -> String = match options.format.as_str() {
        "text" => format_run,
        "yaml" => |r| emit_run_yaml(&to_report(r)),
        "json" => |r| emit_run_json(&to_report(r)),
        "junit" | "xml" => |r| emit_run_junit(&to_report(r)),
        other => {
            return Err(format!(
                "unknown format '{other}' (expected: text, yaml, json, junit)"
            ));
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let registry = BehaviorRegistry::builtin();
    let mut all_output = String::new();
    let mut all_success = true;

    for file in &options.files {
        let (graph, config) = load_graph(file, &registry)?;
        let result = runtime.block_on(Scheduler::new(graph, config).with_sink(LogSink).schedule());
        all_output.push_str(&emit(&result));
        if !result.success() {
            all_success = false;
        }
    }

    if let Some(out_path) = &options.output {
        std::fs::write(out_path, &all_output)
            .map_err(|e| format!("failed to write {}: {e}", out_path.display()))?;
        eprintln!("results written to {}", out_path.display());
    } else {
        print!("{all_output}");
    }

    Ok(all_success)
}
