//! Fatal errors for an ingestion run.
//!
//! Per-file and per-group problems never surface here; they become
//! [`crate::run_log::LogEntry`] values and the run continues.

use sensorflow_db::BackendError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sensor store is locked by another process: {0}")]
    StoreLocked(String),

    #[error("Sensor store error: {0}")]
    Store(BackendError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IngestError {
    /// True when nothing ran because the inputs were rejected.
    pub fn is_config(&self) -> bool {
        matches!(self, IngestError::Config(_))
    }
}

impl From<BackendError> for IngestError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Locked(path) => IngestError::StoreLocked(path),
            other => IngestError::Store(other),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, IngestError>;
