//! Run command - one ingestion pass over the target folder

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_duration_ms, format_number, print_table, print_table_colored};
use clap::Args;
use comfy_table::Color;
use indicatif::{ProgressBar, ProgressStyle};
use sensorflow::{EventInfo, IngestConfig, Pipeline, RunReport, RunSummary, Severity};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// TOML config file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Root folder to scan
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Base-name pattern (glob, or substring when it has no wildcard)
    #[arg(short = 'p', long = "pattern")]
    pub patterns: Vec<String>,

    /// Text encoding of the CSV files (e.g. utf-8, shift_jis)
    #[arg(long)]
    pub encoding: Option<String>,

    /// DuckDB file to load into
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Event window, repeatable
    #[arg(long = "event", value_name = "LABEL,START,END")]
    pub events: Vec<String>,

    /// Reshape worker threads
    #[arg(long)]
    pub workers: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print a single summary line
    #[arg(short, long)]
    pub quiet: bool,
}

/// Merge the config file (if any) with flag overrides.
pub fn build_config(args: &RunArgs) -> Result<IngestConfig, HelpfulError> {
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path)
            .map_err(|e| HelpfulError::config_file(path, &e.to_string()))?,
        None => IngestConfig::default(),
    };

    if let Some(root) = &args.root {
        config.target_folder = sensorflow::config::expand_home(root);
    }
    if !args.patterns.is_empty() {
        config.name_patterns = args.patterns.clone();
    }
    if let Some(encoding) = &args.encoding {
        config.encoding = encoding.clone();
    }
    if let Some(db) = &args.db {
        config.db_path = sensorflow::config::expand_home(db);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if !args.events.is_empty() {
        config.events = args
            .events
            .iter()
            .map(|raw| EventInfo::parse_spec(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HelpfulError::from_ingest(&e, &config.db_path))?;
    }

    Ok(config)
}

/// Execute the run command
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;

    let progress = if args.json || args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} event groups")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    let report = Pipeline::new(&config)
        .with_progress(progress)
        .run()
        .map_err(|e| HelpfulError::from_ingest(&e, &config.db_path))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if args.quiet {
        let s = &report.summary;
        println!(
            "{} rows inserted from {} event groups ({} skipped entries)",
            s.rows_inserted,
            s.pairs_committed,
            report.skips().count()
        );
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    print_table(&["Metric", "Value"], summary_rows(&report.summary));

    let skips: Vec<Vec<(String, Option<Color>)>> = report
        .skips()
        .map(|entry| {
            let color = match entry.severity {
                Severity::Error => Some(Color::Red),
                Severity::Warning => Some(Color::Yellow),
                Severity::Info => None,
            };
            vec![
                (entry.severity.to_string(), color),
                (entry.stage.to_string(), None),
                (entry.subject.clone(), None),
                (
                    entry
                        .reason
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    None,
                ),
                (entry.message.clone(), None),
            ]
        })
        .collect();

    if skips.is_empty() {
        println!("No files or rows were skipped.");
    } else {
        println!();
        print_table_colored(&["Severity", "Stage", "Subject", "Reason", "Detail"], skips);
    }
}

fn summary_rows(s: &RunSummary) -> Vec<Vec<String>> {
    [
        ("Files found", s.files_found),
        ("Archives skipped", s.archives_skipped),
        ("Unrecognized names", s.files_unrecognized),
        ("Groups", s.groups),
        ("Groups without event", s.groups_without_event),
        ("Groups already processed", s.groups_already_processed),
        ("Event groups matched", s.pairs_matched),
        ("Event groups committed", s.pairs_committed),
        ("Event groups failed", s.pairs_failed),
        ("Files reshaped", s.files_reshaped),
        ("Files skipped", s.files_skipped),
        ("Rows malformed", s.rows_malformed),
        ("Rows outside window", s.rows_outside_window),
        ("Rows emitted", s.rows_emitted),
        ("Rows inserted", s.rows_inserted),
        ("Rows already present", s.rows_duplicate),
        ("Processed records", s.processed_records),
    ]
    .into_iter()
    .map(|(label, value)| vec![label.to_string(), format_number(value)])
    .chain(std::iter::once(vec![
        "Duration".to_string(),
        format_duration_ms(s.duration_ms),
    ]))
    .collect()
}
