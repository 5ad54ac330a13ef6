//! SensorFlow command-line entry point.
//!
//! Exit status:
//! - 0: run completed, possibly with skipped files or rows
//! - 1: fatal store failure (open, lock, schema)
//! - 2: invalid configuration, nothing was run

use clap::{Parser, Subcommand};
use sensorflow_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "sensorflow",
    version,
    about = "Load factory sensor CSV exports into DuckDB, once per file and event"
)]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Directory for the dated log file (default: $SENSORFLOW_HOME/logs)
    #[arg(long, global = true, env = "SENSORFLOW_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan, match events, reshape, and load
    Run(cli::run::RunArgs),

    /// Query stored readings
    Extract(cli::extract::ExtractArgs),

    /// List files already loaded per event
    Processed(cli::processed::ProcessedArgs),
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => cli::run::run(args),
        Commands::Extract(args) => cli::extract::run(args),
        Commands::Processed(args) => cli::processed::run(args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "sensorflow",
        verbose: cli.verbose,
        log_dir: cli.log_dir.clone(),
    }) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }

    match run_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<cli::error::HelpfulError>() {
                Some(helpful) => eprint!("{}", helpful),
                None => eprintln!("ERROR: {:?}", err),
            }
            ExitCode::from(cli::error::exit_code_for(&err))
        }
    }
}
