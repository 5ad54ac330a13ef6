//! Run configuration: where to look, what to match, and which events matter.

use crate::error::{IngestError, Result};
use crate::timespan::{parse_timestamp, TimeSpan};
use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A declared time window of operational interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    #[serde(rename = "event")]
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub start_time: NaiveDateTime,

    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub end_time: NaiveDateTime,
}

impl EventInfo {
    pub fn new(label: impl Into<String>, start_time: NaiveDateTime, end_time: NaiveDateTime) -> Self {
        Self {
            label: label.into(),
            description: None,
            start_time,
            end_time,
        }
    }

    /// Parse the CLI shorthand `LABEL,START,END`.
    pub fn parse_spec(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        let [label, start, end] = parts.as_slice() else {
            return Err(IngestError::Config(format!(
                "event '{}' must be LABEL,START,END",
                raw
            )));
        };
        let parse = |s: &str| {
            parse_timestamp(s).ok_or_else(|| {
                IngestError::Config(format!("event '{}': invalid timestamp '{}'", label, s))
            })
        };
        Ok(Self::new(*label, parse(*start)?, parse(*end)?))
    }

    /// The event window, or `None` when `start_time >= end_time`.
    pub fn window(&self) -> Option<TimeSpan> {
        TimeSpan::new(self.start_time, self.end_time)
    }
}

fn serialize_timestamp<S: Serializer>(
    value: &NaiveDateTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

/// Ingestion configuration, loaded from TOML and overlaid by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root folder scanned recursively for sensor files
    #[serde(default)]
    pub target_folder: PathBuf,

    /// Base-name patterns; empty matches every candidate
    #[serde(default)]
    pub name_patterns: Vec<String>,

    /// WHATWG encoding label of the CSV text
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// DuckDB file holding readings and processed records
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Reshape worker threads (1 = inline)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Free-form run label, echoed in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default)]
    pub events: Vec<EventInfo>,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("sensor_data.duckdb")
}

fn default_workers() -> usize {
    1
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            target_folder: PathBuf::new(),
            name_patterns: Vec::new(),
            encoding: default_encoding(),
            db_path: default_db_path(),
            workers: default_workers(),
            label: None,
            events: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: IngestConfig = toml::from_str(&content)
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))?;
        config.target_folder = expand_home(&config.target_folder);
        config.db_path = expand_home(&config.db_path);
        Ok(config)
    }

    /// Resolve the configured text encoding.
    pub fn text_encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes()).ok_or_else(|| {
            IngestError::Config(format!("unknown text encoding '{}'", self.encoding))
        })
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(IngestError::Config(
                "at least one event must be declared".to_string(),
            ));
        }

        let mut labels = HashSet::new();
        for event in &self.events {
            if event.label.trim().is_empty() {
                return Err(IngestError::Config("event label is empty".to_string()));
            }
            if event.window().is_none() {
                return Err(IngestError::Config(format!(
                    "event '{}': start_time {} is not before end_time {}",
                    event.label, event.start_time, event.end_time
                )));
            }
            if !labels.insert(event.label.as_str()) {
                return Err(IngestError::Config(format!(
                    "duplicate event label '{}'",
                    event.label
                )));
            }
        }

        self.text_encoding()?;

        if self.target_folder.as_os_str().is_empty() {
            return Err(IngestError::Config("target folder is not set".to_string()));
        }
        if !self.target_folder.is_dir() {
            return Err(IngestError::Config(format!(
                "target folder {} is not a directory",
                self.target_folder.display()
            )));
        }
        std::fs::read_dir(&self.target_folder).map_err(|e| {
            IngestError::Config(format!(
                "target folder {} is not readable: {}",
                self.target_folder.display(),
                e
            ))
        })?;

        if self.workers == 0 {
            return Err(IngestError::Config("workers must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with_root(root: &Path) -> IngestConfig {
        IngestConfig {
            target_folder: root.to_path_buf(),
            events: vec![EventInfo::parse_spec("run1,2024-01-01T00:00,2024-01-01T23:59").unwrap()],
            ..IngestConfig::default()
        }
    }

    #[test]
    fn loads_toml_with_events() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(
            &path,
            r#"
target_folder = "./data"
name_patterns = ["Cond", "Vib"]
encoding = "shift_jis"
workers = 4

[[events]]
event = "startup"
description = "cold start"
start_time = "2024-11-21T00:00:00"
end_time = "2024-11-21 00:30"
"#,
        )
        .unwrap();

        let config = IngestConfig::load(&path).unwrap();
        assert_eq!(config.target_folder, PathBuf::from("./data"));
        assert_eq!(config.name_patterns, vec!["Cond", "Vib"]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.db_path, PathBuf::from("sensor_data.duckdb"));
        assert_eq!(config.events.len(), 1);
        assert_eq!(config.events[0].label, "startup");
        assert_eq!(config.events[0].description.as_deref(), Some("cold start"));
        assert_eq!(
            config.events[0].end_time,
            parse_timestamp("2024-11-21 00:30:00").unwrap()
        );
        assert_eq!(config.text_encoding().unwrap(), encoding_rs::SHIFT_JIS);
    }

    #[test]
    fn bad_timestamp_in_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(
            &path,
            "[[events]]\nevent = \"x\"\nstart_time = \"soon\"\nend_time = \"later\"\n",
        )
        .unwrap();

        let err = IngestConfig::load(&path).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn validate_accepts_minimal_config() {
        let dir = TempDir::new().unwrap();
        config_with_root(dir.path()).validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_inputs() {
        let dir = TempDir::new().unwrap();

        let mut no_events = config_with_root(dir.path());
        no_events.events.clear();
        assert!(no_events.validate().unwrap_err().is_config());

        let mut inverted = config_with_root(dir.path());
        inverted.events[0].end_time = inverted.events[0].start_time;
        assert!(inverted.validate().unwrap_err().is_config());

        let mut duplicate = config_with_root(dir.path());
        duplicate.events.push(duplicate.events[0].clone());
        assert!(duplicate.validate().unwrap_err().is_config());

        let mut encoding = config_with_root(dir.path());
        encoding.encoding = "klingon".to_string();
        assert!(encoding.validate().unwrap_err().is_config());

        let missing_root = config_with_root(&dir.path().join("missing"));
        assert!(missing_root.validate().unwrap_err().is_config());
    }

    #[test]
    fn parse_spec_requires_three_parts() {
        assert!(EventInfo::parse_spec("run1,2024-01-01").is_err());
        assert!(EventInfo::parse_spec("run1,2024-01-01,not-a-time").is_err());
        let event = EventInfo::parse_spec("run1, 2024-01-01 00:00 , 2024-01-02").unwrap();
        assert_eq!(event.label, "run1");
        assert!(event.window().is_some());
    }
}
