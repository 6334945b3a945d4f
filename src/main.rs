use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use suitegraph::cli::commands::{self, DryRunOptions};

#[derive(Parser)]
#[command(
    name = "suitegraph",
    about = "suitegraph: dependency-ordered test and suite runner",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate run spec files without running them
    Validate {
        /// Input run spec files (.yaml)
        files: Vec<PathBuf>,
    },

    /// Render dependency graphs as diagrams
    Graph {
        /// Input run spec files (.yaml)
        files: Vec<PathBuf>,

        /// Diagram format: dot, mermaid
        #[arg(short, long, default_value = "dot")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a valid start order for each run spec
    Order {
        /// Input run spec files (.yaml)
        files: Vec<PathBuf>,
    },

    /// Schedule run specs with built-in simulated behaviors
    DryRun {
        /// Input run spec files (.yaml)
        files: Vec<PathBuf>,

        /// Output format: text, yaml, json, junit
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_files(files: &[PathBuf]) {
    if files.is_empty() {
        eprintln!("error: no input files provided");
        std::process::exit(1);
    }
}

fn print_or_exit(result: Result<String, String>) {
    match result {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Validate { files }) => {
            require_files(&files);
            match commands::run_validate(&files) {
                Ok(result) => println!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Graph {
            files,
            format,
            output,
        }) => {
            require_files(&files);
            print_or_exit(commands::run_graph(&files, &format, output.as_ref()));
        }
        Some(Commands::Order { files }) => {
            require_files(&files);
            print_or_exit(commands::run_order(&files));
        }
        Some(Commands::DryRun {
            files,
            format,
            output,
        }) => {
            require_files(&files);
            let options = DryRunOptions {
                files,
                format,
                output,
            };
            match commands::run_dry(&options) {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            // No subcommand: show help
            Cli::parse_from(["suitegraph", "--help"]);
        }
    }
}
