//! Persistent sensor store (DuckDB).
//!
//! Tables:
//! - `sensor_data`: long readings, unique on (timestamp, sensor_id, source_file)
//! - `processed_file_periods`: one row per ingested (source_file, event_label)
//! - `sensor_channels`: header metadata of every kept column

use crate::error::Result;
use crate::events::ProcessedIndex;
use crate::reshape::{SensorChannel, SensorReading};
use chrono::NaiveDateTime;
use sensorflow_db::{BackendError, ConflictPolicy, DbConnection, DbTimestamp, DbTransaction, DbValue};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Schema SQL for the sensor store.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sensor_data (
    timestamp TIMESTAMP NOT NULL,
    sensor_id TEXT NOT NULL,
    value DOUBLE,
    source_file TEXT NOT NULL,
    event_label TEXT NOT NULL,
    PRIMARY KEY (timestamp, sensor_id, source_file)
);

CREATE TABLE IF NOT EXISTS processed_file_periods (
    source_file TEXT NOT NULL,
    event_label TEXT NOT NULL,
    processed_at TIMESTAMP NOT NULL,
    PRIMARY KEY (source_file, event_label)
);

CREATE TABLE IF NOT EXISTS sensor_channels (
    source_file TEXT NOT NULL,
    sensor_id TEXT NOT NULL,
    category TEXT,
    unit TEXT,
    PRIMARY KEY (source_file, sensor_id)
);

CREATE INDEX IF NOT EXISTS idx_sensor_data_event ON sensor_data(event_label);
"#;

const READING_COLUMNS: [&str; 5] = ["timestamp", "sensor_id", "value", "source_file", "event_label"];
const CHANNEL_COLUMNS: [&str; 4] = ["source_file", "sensor_id", "category", "unit"];

const UPSERT_PROCESSED_SQL: &str = "INSERT INTO processed_file_periods (source_file, event_label, processed_at) \
     VALUES (?, ?, ?) \
     ON CONFLICT (source_file, event_label) DO UPDATE SET processed_at = excluded.processed_at";

/// A persisted processed marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedRecord {
    pub source_file: String,
    pub event_label: String,
    pub processed_at: NaiveDateTime,
}

/// Everything committed for one (group, event) pair.
#[derive(Debug, Default)]
pub struct LoadBatch<'a> {
    pub event_label: &'a str,
    pub channels: Vec<&'a SensorChannel>,
    pub readings: Vec<&'a SensorReading>,
    /// Member files to mark processed once the rows are in
    pub processed_files: Vec<&'a str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    pub processed_records: u64,
}

/// Sensor store wrapper.
#[derive(Clone, Debug)]
pub struct SensorStore {
    conn: DbConnection,
}

impl SensorStore {
    /// Open the store for writing, taking the exclusive lock.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = DbConnection::open_duckdb(path)?;
        let store = Self { conn };
        store.init_schema()?;
        info!(path = %path.display(), "Opened sensor store");
        Ok(store)
    }

    /// Open an existing store for queries only.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let conn = DbConnection::open_duckdb_readonly(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = DbConnection::open_duckdb_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &DbConnection {
        &self.conn
    }

    /// Snapshot of every processed (source_file, event_label) pair.
    pub fn processed_index(&self) -> Result<ProcessedIndex> {
        let rows = self.conn.query_all(
            "SELECT source_file, event_label FROM processed_file_periods",
            &[],
        )?;
        let mut index = ProcessedIndex::new();
        for row in rows {
            index.insert(row.get::<String>(0)?, row.get::<String>(1)?);
        }
        Ok(index)
    }

    /// Insert readings, silently skipping (timestamp, sensor_id, source_file)
    /// triples that already exist. Returns the number actually inserted.
    pub fn register(&self, rows: &[SensorReading]) -> Result<u64> {
        let rows: Vec<&SensorReading> = rows.iter().collect();
        let inserted = self.conn.transaction(|tx| insert_readings(tx, &rows))?;
        Ok(inserted)
    }

    /// Upsert the processed marker for one file and event.
    pub fn mark_processed(&self, source_file: &str, event_label: &str) -> Result<()> {
        self.conn.execute(
            UPSERT_PROCESSED_SQL,
            &[
                source_file.into(),
                event_label.into(),
                DbTimestamp::now().into(),
            ],
        )?;
        Ok(())
    }

    /// Commit channels, readings, and processed markers in one transaction.
    pub fn commit(&self, batch: &LoadBatch<'_>) -> std::result::Result<LoadOutcome, BackendError> {
        self.conn.transaction(|tx| {
            insert_channels(tx, &batch.channels)?;
            let rows_inserted = insert_readings(tx, &batch.readings)?;

            let processed_at: DbValue = DbTimestamp::now().into();
            for source_file in &batch.processed_files {
                tx.execute(
                    UPSERT_PROCESSED_SQL,
                    &[
                        (*source_file).into(),
                        batch.event_label.into(),
                        processed_at.clone(),
                    ],
                )?;
            }

            Ok(LoadOutcome {
                rows_inserted,
                rows_duplicate: batch.readings.len() as u64 - rows_inserted,
                processed_records: batch.processed_files.len() as u64,
            })
        })
    }

    pub fn count_readings(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_scalar("SELECT COUNT(*) FROM sensor_data", &[])?;
        Ok(count as u64)
    }

    /// Processed records, optionally for one event, oldest first.
    pub fn list_processed(&self, event_label: Option<&str>) -> Result<Vec<ProcessedRecord>> {
        let (sql, params): (&str, Vec<DbValue>) = match event_label {
            Some(label) => (
                "SELECT source_file, event_label, processed_at FROM processed_file_periods \
                 WHERE event_label = ? ORDER BY processed_at, source_file",
                vec![label.into()],
            ),
            None => (
                "SELECT source_file, event_label, processed_at FROM processed_file_periods \
                 ORDER BY processed_at, source_file, event_label",
                Vec::new(),
            ),
        };
        self.conn
            .query_all(sql, &params)?
            .into_iter()
            .map(|row| {
                Ok(ProcessedRecord {
                    source_file: row.get(0)?,
                    event_label: row.get(1)?,
                    processed_at: row.get(2)?,
                })
            })
            .collect()
    }

    pub fn list_channels(&self, source_file: &str) -> Result<Vec<SensorChannel>> {
        self.conn
            .query_all(
                "SELECT source_file, sensor_id, category, unit FROM sensor_channels \
                 WHERE source_file = ? ORDER BY sensor_id",
                &[source_file.into()],
            )?
            .into_iter()
            .map(|row| {
                Ok(SensorChannel {
                    source_file: row.get(0)?,
                    sensor_id: row.get(1)?,
                    category: row.get::<Option<String>>(2)?.unwrap_or_default(),
                    unit: row.get::<Option<String>>(3)?.unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Dedup in memory (first occurrence wins), then insert with conflicts
/// ignored. The count comes from the table because DuckDB does not report
/// skipped conflicts separately.
fn insert_readings(
    tx: &mut DbTransaction<'_>,
    rows: &[&SensorReading],
) -> std::result::Result<u64, BackendError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut seen = HashSet::with_capacity(rows.len());
    let values: Vec<Vec<DbValue>> = rows
        .iter()
        .filter(|r| seen.insert((r.timestamp, r.sensor_id.as_str(), r.source_file.as_str())))
        .map(|r| {
            vec![
                r.timestamp.into(),
                r.sensor_id.as_str().into(),
                r.value.into(),
                r.source_file.as_str().into(),
                r.event_label.as_str().into(),
            ]
        })
        .collect();

    let before: i64 = tx.query_scalar("SELECT COUNT(*) FROM sensor_data", &[])?;
    tx.insert_rows("sensor_data", &READING_COLUMNS, &values, ConflictPolicy::Ignore)?;
    let after: i64 = tx.query_scalar("SELECT COUNT(*) FROM sensor_data", &[])?;
    Ok((after - before).max(0) as u64)
}

fn insert_channels(
    tx: &mut DbTransaction<'_>,
    channels: &[&SensorChannel],
) -> std::result::Result<u64, BackendError> {
    let values: Vec<Vec<DbValue>> = channels
        .iter()
        .map(|c| {
            vec![
                c.source_file.as_str().into(),
                c.sensor_id.as_str().into(),
                c.category.as_str().into(),
                c.unit.as_str().into(),
            ]
        })
        .collect();
    tx.insert_rows("sensor_channels", &CHANNEL_COLUMNS, &values, ConflictPolicy::Ignore)
}
