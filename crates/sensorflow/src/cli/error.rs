//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it
//! - The process exit code it maps to

use sensorflow::IngestError;
use sensorflow_db::read_lock_owner;
use std::fmt;
use std::path::Path;

/// Fatal store failure (open, lock, schema).
pub const EXIT_STORE_FAILURE: u8 = 1;
/// Rejected input; nothing was run.
pub const EXIT_INVALID_CONFIG: u8 = 2;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
    pub exit_code: u8,
}

impl HelpfulError {
    /// Create a new helpful error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            exit_code: EXIT_STORE_FAILURE,
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a suggestion for fixing the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add multiple suggestions
    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    pub fn with_exit_code(mut self, code: u8) -> Self {
        self.exit_code = code;
        self
    }

    // === Common error constructors ===

    /// Configuration rejected before anything ran
    pub fn invalid_config(details: &str) -> Self {
        Self::new(format!("Invalid configuration: {}", details))
            .with_context("Nothing was scanned or written")
            .with_suggestions([
                "TRY: Declare at least one event: --event LABEL,START,END".to_string(),
                "TRY: Timestamps look like 2024-01-01T00:00:00 or 2024-01-01 00:00".to_string(),
                "TRY: Check target_folder and encoding in the config file".to_string(),
            ])
            .with_exit_code(EXIT_INVALID_CONFIG)
    }

    /// Config file could not be read or parsed
    pub fn config_file(path: &Path, details: &str) -> Self {
        Self::new(format!("Cannot load config file: {}", path.display()))
            .with_context(details.to_string())
            .with_suggestions([
                format!("TRY: Check that the file exists: ls -la {}", path.display()),
                "TRY: Events are [[events]] tables with event, start_time, end_time".to_string(),
            ])
            .with_exit_code(EXIT_INVALID_CONFIG)
    }

    /// Timestamp flag did not parse
    pub fn invalid_timestamp(flag: &str, value: &str) -> Self {
        Self::new(format!("Invalid timestamp for {}: '{}'", flag, value))
            .with_suggestion("TRY: Use YYYY-MM-DD, YYYY-MM-DD HH:MM[:SS] or YYYY-MM-DDTHH:MM[:SS]")
            .with_exit_code(EXIT_INVALID_CONFIG)
    }

    /// Another process holds the writer lock
    pub fn store_locked(db_path: &Path) -> Self {
        let holder = match read_lock_owner(db_path) {
            Some(owner) => format!(
                "Held by pid {} ({}) since {}",
                owner.pid,
                owner.exe.as_deref().unwrap_or("unknown executable"),
                owner.timestamp
            ),
            None => "Another process holds the writer lock".to_string(),
        };
        Self::new(format!("Sensor store is locked: {}", db_path.display()))
            .with_context(holder)
            .with_suggestions([
                "TRY: Wait for the other run to finish, then retry".to_string(),
                "TRY: Use a different --db for parallel experiments".to_string(),
            ])
    }

    /// Store could not be opened or written
    pub fn store_failure(db_path: &Path, details: &str) -> Self {
        Self::new(format!("Sensor store failure: {}", db_path.display()))
            .with_context(details.to_string())
            .with_suggestions([
                format!("TRY: Check permissions: ls -la {}", db_path.display()),
                "TRY: Make sure the file is a DuckDB database".to_string(),
            ])
    }

    /// Store file does not exist
    pub fn store_not_found(db_path: &Path) -> Self {
        Self::new(format!("Sensor store not found: {}", db_path.display()))
            .with_context("Nothing has been ingested into this database yet")
            .with_suggestions([
                "TRY: Run an ingestion first: sensorflow run --config FILE".to_string(),
                "TRY: Point --db at an existing database".to_string(),
            ])
            .with_exit_code(EXIT_INVALID_CONFIG)
    }

    /// Map a fatal run error to its CLI form
    pub fn from_ingest(err: &IngestError, db_path: &Path) -> Self {
        match err {
            IngestError::Config(details) => Self::invalid_config(details),
            IngestError::StoreLocked(_) => Self::store_locked(db_path),
            other => Self::store_failure(db_path, &other.to_string()),
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Exit code for a command failure
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<HelpfulError>()
        .map(|e| e.exit_code)
        .unwrap_or(EXIT_STORE_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While processing data")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While processing data"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_config_errors_exit_2() {
        let err = HelpfulError::from_ingest(
            &IngestError::Config("no events declared".to_string()),
            &PathBuf::from("db.duckdb"),
        );
        assert_eq!(err.exit_code, EXIT_INVALID_CONFIG);
        assert!(err.to_string().contains("no events declared"));

        let wrapped: anyhow::Error = err.into();
        assert_eq!(exit_code_for(&wrapped), EXIT_INVALID_CONFIG);
    }

    #[test]
    fn test_store_errors_exit_1() {
        let path = PathBuf::from("/nonexistent/db.duckdb");
        let locked = HelpfulError::from_ingest(&IngestError::StoreLocked("x".to_string()), &path);
        assert_eq!(locked.exit_code, EXIT_STORE_FAILURE);
        assert!(locked.to_string().contains("locked"));

        let plain = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&plain), EXIT_STORE_FAILURE);
    }
}
