//! Side-channel record of a run: skips, warnings, and the row-count summary.
//!
//! Every entry is also emitted as a `tracing` event so the log artifact and
//! the returned report tell the same story.

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

/// Pipeline stage that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scan,
    Group,
    Match,
    Reshape,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Scan => "scan",
            Stage::Group => "group",
            Stage::Match => "match",
            Stage::Reshape => "reshape",
            Stage::Load => "load",
        };
        f.write_str(s)
    }
}

/// Why an item was left out of the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    CorruptArchive,
    UnreadableFile,
    UnreadableHeader,
    UndecodableText,
    EmptyWindow,
    MalformedRow { line: u64 },
    UnrecognizedName,
    NoReadableData,
    LoadFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::CorruptArchive => f.write_str("corrupt or unreadable archive"),
            SkipReason::UnreadableFile => f.write_str("unreadable file"),
            SkipReason::UnreadableHeader => f.write_str("unreadable header"),
            SkipReason::UndecodableText => f.write_str("text does not decode in the configured encoding"),
            SkipReason::EmptyWindow => f.write_str("event window is empty"),
            SkipReason::MalformedRow { line } => write!(f, "malformed row at line {}", line),
            SkipReason::UnrecognizedName => f.write_str("unrecognized naming pattern"),
            SkipReason::NoReadableData => f.write_str("no readable data"),
            SkipReason::LoadFailed => f.write_str("load failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub stage: Stage,
    /// File id, group key, or `group_key/event` the entry is about
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub message: String,
}

/// Row and item counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files_found: u64,
    pub archives_skipped: u64,
    pub files_unrecognized: u64,
    pub groups: u64,
    pub groups_without_event: u64,
    pub groups_already_processed: u64,
    pub pairs_matched: u64,
    pub pairs_already_processed: u64,
    pub pairs_committed: u64,
    pub pairs_failed: u64,
    pub files_reshaped: u64,
    pub files_skipped: u64,
    pub rows_malformed: u64,
    pub rows_outside_window: u64,
    pub rows_emitted: u64,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    pub processed_records: u64,
    pub duration_ms: u64,
}

/// Everything a run tells its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub entries: Vec<LogEntry>,
}

impl RunReport {
    /// Entries that carry a skip reason.
    pub fn skips(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.reason.is_some())
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity == severity).count()
    }
}

#[derive(Debug, Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
    pub summary: RunSummary,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
        self.push(LogEntry {
            severity: Severity::Info,
            stage,
            subject: subject.into(),
            reason: None,
            message: message.into(),
        });
    }

    /// Record a recoverable skip.
    pub fn skip(
        &mut self,
        stage: Stage,
        subject: impl Into<String>,
        reason: SkipReason,
        detail: impl Into<String>,
    ) {
        self.push(LogEntry {
            severity: Severity::Warning,
            stage,
            subject: subject.into(),
            reason: Some(reason),
            message: detail.into(),
        });
    }

    /// Record a failure that cost a whole unit of work but not the run.
    pub fn error(
        &mut self,
        stage: Stage,
        subject: impl Into<String>,
        reason: SkipReason,
        detail: impl Into<String>,
    ) {
        self.push(LogEntry {
            severity: Severity::Error,
            stage,
            subject: subject.into(),
            reason: Some(reason),
            message: detail.into(),
        });
    }

    pub fn push(&mut self, entry: LogEntry) {
        let reason = entry
            .reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        match entry.severity {
            Severity::Info => info!(
                stage = %entry.stage,
                subject = %entry.subject,
                "{}",
                entry.message
            ),
            Severity::Warning => warn!(
                stage = %entry.stage,
                subject = %entry.subject,
                reason = %reason,
                "{}",
                entry.message
            ),
            Severity::Error => error!(
                stage = %entry.stage,
                subject = %entry.subject,
                reason = %reason,
                "{}",
                entry.message
            ),
        }
        self.entries.push(entry);
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            summary: self.summary,
            entries: self.entries,
        }
    }
}
