//! Processed command - list (file, event) pairs already loaded

use crate::cli::error::HelpfulError;
use crate::cli::extract::open_store;
use crate::cli::output::{format_timestamp, print_table};
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct ProcessedArgs {
    /// DuckDB file to read
    #[arg(long, default_value = "sensor_data.duckdb")]
    pub db: PathBuf,

    /// Only records for this event
    #[arg(long)]
    pub event: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the processed command
pub fn run(args: ProcessedArgs) -> anyhow::Result<()> {
    let store = open_store(&args.db)?;
    let records = store
        .list_processed(args.event.as_deref())
        .map_err(|e| HelpfulError::from_ingest(&e, &args.db))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No processed records.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.source_file.clone(),
                r.event_label.clone(),
                format_timestamp(&r.processed_at),
            ]
        })
        .collect();
    print_table(&["Source File", "Event", "Processed At"], rows);
    Ok(())
}
