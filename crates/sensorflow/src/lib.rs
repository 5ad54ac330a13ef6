//! SensorFlow - event-scoped ingestion of factory sensor CSV exports.
//!
//! A run walks a folder (and ZIP archives inside it), groups files by their
//! naming convention, keeps the groups that overlap a declared event and have
//! not been loaded for it yet, melts each wide CSV into long readings, and
//! commits them to DuckDB once per (file, event).

pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod grouping;
pub mod pipeline;
pub mod reshape;
pub mod run_log;
pub mod scout;
pub mod store;
pub mod timespan;

pub use config::{EventInfo, IngestConfig};
pub use error::{IngestError, Result};
pub use events::{EventMatcher, MatchedPair, ProcessedIndex, ProcessedLookup};
pub use extract::{pivot_wide, query_readings, ReadingFilter, StoredReading, WideTable};
pub use grouping::{GroupBuilder, GroupedSensorFileSet};
pub use pipeline::{run, Pipeline};
pub use reshape::{Reshaper, SensorChannel, SensorReading};
pub use run_log::{LogEntry, RunLog, RunReport, RunSummary, Severity, SkipReason, Stage};
pub use store::{ProcessedRecord, SensorStore};
pub use timespan::TimeSpan;
