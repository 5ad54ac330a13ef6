//! Grouping of discovered files into logical sensor reading sets.
//!
//! A file joins a group through one of the recognized naming conventions;
//! the first convention that matches wins, so every file lands in at most one
//! group. Files that match none are rejected with [`UnrecognizedName`].

use crate::scout::FileMetadata;
use crate::timespan::TimeSpan;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest session a machine log can cover.
const MACHINE_LOG_MAX_SPAN_HOURS: i64 = 2;

/// `PLANT#MACHINEddmmyyHHMMSS_SENSORTYPE.csv`
static MACHINE_LOG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<plant>[A-Z]+)#(?P<machine>\d+)(?P<stamp>\d{12})_(?P<sensor>[^.]+)(?i:\.csv)$")
        .expect("valid machine log pattern")
});

/// `PREFIX_YYYY-MM-DD[_SENSORTYPE].csv`
static DATED_SERIES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<prefix>[^_]+)_(?P<date>\d{4}-\d{2}-\d{2})(?:_(?P<sensor>[^.]+))?(?i:\.csv)$",
    )
    .expect("valid dated series pattern")
});

/// Plant and machine encoded in a machine-log file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Origin {
    pub plant: String,
    pub machine: String,
}

/// What a file name says about the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub group_key: String,
    pub sensor_type: String,
    pub span: TimeSpan,
    pub origin: Option<Origin>,
}

/// A file whose name follows no known convention.
#[derive(Debug, Error)]
#[error("unrecognized naming pattern: {source_file}")]
pub struct UnrecognizedName {
    pub source_file: String,
}

/// Interpret a file name under the recognized conventions.
pub fn parse_file_name(meta: &FileMetadata) -> Option<ParsedName> {
    parse_machine_log(meta).or_else(|| parse_dated_series(&meta.inferred_name))
}

fn parse_machine_log(meta: &FileMetadata) -> Option<ParsedName> {
    let caps = MACHINE_LOG.captures(&meta.inferred_name)?;
    let start = NaiveDateTime::parse_from_str(&caps["stamp"], "%d%m%y%H%M%S").ok()?;

    let mut end = start + Duration::hours(MACHINE_LOG_MAX_SPAN_HOURS);
    // Archive member times come from DOS timestamps and are not trusted.
    if !meta.is_archive_member() {
        if let Some(mtime) = meta.modified_time.filter(|m| *m > start) {
            end = end.min(mtime);
        }
    }

    let stem = &meta.inferred_name[..meta.inferred_name.len() - ".csv".len()];
    let (group_key, sensor_type) = stem.split_once('_')?;

    Some(ParsedName {
        group_key: group_key.to_string(),
        sensor_type: sensor_type.to_string(),
        span: TimeSpan::new(start, end)?,
        origin: Some(Origin {
            plant: caps["plant"].to_string(),
            machine: caps["machine"].to_string(),
        }),
    })
}

fn parse_dated_series(name: &str) -> Option<ParsedName> {
    let caps = DATED_SERIES.captures(name)?;
    let date = NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d").ok()?;
    let start = date.and_hms_opt(0, 0, 0)?;
    let prefix = caps["prefix"].to_string();
    let sensor_type = caps
        .name("sensor")
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| prefix.clone());

    Some(ParsedName {
        group_key: prefix,
        sensor_type,
        span: TimeSpan::new(start, start + Duration::days(1))?,
        origin: None,
    })
}

/// Files believed to form one logical sensor reading session.
#[derive(Debug, Clone, Serialize)]
pub struct GroupedSensorFileSet {
    pub group_key: String,
    pub sensor_type: String,
    /// Ordered by (span start, source file)
    pub members: Vec<FileMetadata>,
    /// Hull of the members' spans
    pub time_span: TimeSpan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
}

impl GroupedSensorFileSet {
    /// `group_key` alone when it already names the sensor type.
    pub fn display_key(&self) -> String {
        if self.group_key == self.sensor_type {
            self.group_key.clone()
        } else {
            format!("{}_{}", self.group_key, self.sensor_type)
        }
    }
}

/// Accumulates files into groups keyed by (group_key, sensor_type).
#[derive(Debug, Default)]
pub struct GroupBuilder {
    groups: BTreeMap<(String, String), Vec<(TimeSpan, FileMetadata, Option<Origin>)>>,
}

impl GroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one file; rejects names that follow no known convention.
    pub fn add(&mut self, meta: FileMetadata) -> Result<(), UnrecognizedName> {
        let Some(parsed) = parse_file_name(&meta) else {
            return Err(UnrecognizedName {
                source_file: meta.source_file,
            });
        };
        self.groups
            .entry((parsed.group_key, parsed.sensor_type))
            .or_default()
            .push((parsed.span, meta, parsed.origin));
        Ok(())
    }

    /// Finish grouping, in (group_key, sensor_type) order.
    pub fn finish(self) -> Vec<GroupedSensorFileSet> {
        self.groups
            .into_iter()
            .filter_map(|((group_key, sensor_type), mut members)| {
                members.sort_by(|a, b| {
                    (a.0.start, &a.1.source_file).cmp(&(b.0.start, &b.1.source_file))
                });
                let time_span = members
                    .iter()
                    .map(|(span, _, _)| *span)
                    .reduce(|acc, span| acc.hull(&span))?;
                let origin = members.iter().find_map(|(_, _, origin)| origin.clone());
                Some(GroupedSensorFileSet {
                    group_key,
                    sensor_type,
                    members: members.into_iter().map(|(_, meta, _)| meta).collect(),
                    time_span,
                    origin,
                })
            })
            .collect()
    }
}
