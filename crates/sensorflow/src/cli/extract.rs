//! Extract command - read readings back out of the store

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_timestamp, format_value, print_table};
use clap::Args;
use sensorflow::timespan::parse_timestamp;
use sensorflow::{pivot_wide, query_readings, ReadingFilter, SensorStore};
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// DuckDB file to read
    #[arg(long, default_value = "sensor_data.duckdb")]
    pub db: PathBuf,

    /// Only readings loaded for this event
    #[arg(long)]
    pub event: Option<String>,

    /// Earliest timestamp (inclusive)
    #[arg(long)]
    pub from: Option<String>,

    /// Latest timestamp (exclusive)
    #[arg(long)]
    pub to: Option<String>,

    /// Sensor id, repeatable
    #[arg(long = "sensor")]
    pub sensors: Vec<String>,

    /// Maximum readings returned
    #[arg(long)]
    pub limit: Option<usize>,

    /// One row per timestamp, one column per sensor
    #[arg(long)]
    pub wide: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Open an existing store for reading.
pub fn open_store(db: &Path) -> Result<SensorStore, HelpfulError> {
    if !db.exists() {
        return Err(HelpfulError::store_not_found(db));
    }
    SensorStore::open_readonly(db).map_err(|e| HelpfulError::from_ingest(&e, db))
}

fn parse_bound(flag: &str, value: Option<&str>) -> Result<Option<chrono::NaiveDateTime>, HelpfulError> {
    value
        .map(|raw| parse_timestamp(raw).ok_or_else(|| HelpfulError::invalid_timestamp(flag, raw)))
        .transpose()
}

/// Execute the extract command
pub fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let filter = ReadingFilter {
        event_label: args.event.clone(),
        from: parse_bound("--from", args.from.as_deref())?,
        to: parse_bound("--to", args.to.as_deref())?,
        sensor_ids: args.sensors.clone(),
        limit: args.limit,
    };

    let store = open_store(&args.db)?;
    let readings =
        query_readings(&store, &filter).map_err(|e| HelpfulError::from_ingest(&e, &args.db))?;

    if args.wide {
        let table = pivot_wide(&readings);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&table)?);
            return Ok(());
        }
        let mut headers = vec!["Timestamp"];
        headers.extend(table.columns.iter().map(String::as_str));
        let rows: Vec<Vec<String>> = table
            .rows
            .iter()
            .map(|row| {
                std::iter::once(format_timestamp(&row.timestamp))
                    .chain(row.values.iter().map(|v| format_value(*v)))
                    .collect()
            })
            .collect();
        print_table(&headers, rows);
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&readings)?);
        return Ok(());
    }

    let rows: Vec<Vec<String>> = readings
        .iter()
        .map(|r| {
            vec![
                format_timestamp(&r.timestamp),
                r.sensor_id.clone(),
                format_value(r.value),
                r.source_file.clone(),
                r.event_label.clone(),
            ]
        })
        .collect();
    print_table(&["Timestamp", "Sensor", "Value", "Source File", "Event"], rows);
    println!("{} readings", readings.len());
    Ok(())
}
