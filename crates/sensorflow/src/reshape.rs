//! Wide multi-header sensor CSV to long readings.
//!
//! Layout of every sensor file:
//!
//! ```text
//! row 1:  <ignored>, category, category, ...
//! row 2:  <ignored>, sensor id, sensor id, ...
//! row 3:  <ignored>, unit, unit, ...
//! row 4+: timestamp, value, value, ...
//! ```
//!
//! Column alignment is positional. Placeholder columns (sensor id `-` or
//! blank) and repeated sensor ids after their first column are dropped.

use crate::config::EventInfo;
use crate::events::MatchedPair;
use crate::scout::{read_file_bytes, FileMetadata, ScanError};
use crate::timespan::{parse_timestamp, TimeSpan};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord};
use encoding_rs::Encoding;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;
use thiserror::Error;

const HEADER_ROWS: usize = 3;
const PLACEHOLDER_ID: &str = "-";

/// Why a whole file could not be reshaped.
#[derive(Error, Debug)]
pub enum ReshapeError {
    #[error("read failed: {0}")]
    Read(#[from] ScanError),

    #[error("text is not valid {0}")]
    Decode(&'static str),

    #[error("unreadable header: {0}")]
    Header(String),

    #[error("event window is empty")]
    EmptyWindow,
}

/// One long-format reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub timestamp: NaiveDateTime,
    pub sensor_id: String,
    pub value: f64,
    pub source_file: String,
    pub event_label: String,
    #[serde(skip)]
    pub group_key: String,
}

/// Header metadata of one kept column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorChannel {
    pub source_file: String,
    pub sensor_id: String,
    pub category: String,
    pub unit: String,
}

/// A data row that was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    /// 1-based line in the file
    pub line: u64,
    pub detail: String,
}

/// Result of reshaping one file for one event.
#[derive(Debug, Clone, Default)]
pub struct FileReshape {
    pub source_file: String,
    pub channels: Vec<SensorChannel>,
    pub readings: Vec<SensorReading>,
    pub malformed: Vec<MalformedRow>,
    pub rows_outside_window: u64,
    pub placeholder_columns: usize,
    /// Sensor ids whose later columns were dropped
    pub duplicate_sensor_ids: Vec<String>,
}

#[derive(Debug)]
pub enum FileOutcome {
    Reshaped(FileReshape),
    Skipped {
        source_file: String,
        error: ReshapeError,
    },
}

/// All member files of a matched pair, in member order.
#[derive(Debug)]
pub struct ReshapedGroup {
    pub pair: MatchedPair,
    pub files: Vec<FileOutcome>,
}

impl ReshapedGroup {
    /// True when every member was skipped.
    pub fn has_no_readable_data(&self) -> bool {
        self.files
            .iter()
            .all(|f| matches!(f, FileOutcome::Skipped { .. }))
    }
}

/// Column plan derived from the three header rows.
#[derive(Debug)]
struct HeaderPlan {
    /// (column index, channel) for every kept column
    kept: Vec<(usize, SensorChannel)>,
    placeholder_columns: usize,
    duplicate_sensor_ids: Vec<String>,
}

/// Decodes and melts sensor files.
#[derive(Debug, Clone, Copy)]
pub struct Reshaper {
    encoding: &'static Encoding,
}

impl Reshaper {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self { encoding }
    }

    /// Read and reshape every pending member of a matched pair.
    pub fn reshape_pair(&self, pair: &MatchedPair) -> ReshapedGroup {
        let files = pair
            .members
            .iter()
            .map(|meta| match self.reshape_file(meta, &pair.group.group_key, &pair.event) {
                Ok(reshaped) => FileOutcome::Reshaped(reshaped),
                Err(error) => FileOutcome::Skipped {
                    source_file: meta.source_file.clone(),
                    error,
                },
            })
            .collect();
        ReshapedGroup {
            pair: pair.clone(),
            files,
        }
    }

    pub fn reshape_file(
        &self,
        meta: &FileMetadata,
        group_key: &str,
        event: &EventInfo,
    ) -> Result<FileReshape, ReshapeError> {
        let bytes = read_file_bytes(meta)?;
        self.reshape_bytes(&bytes, &meta.source_file, group_key, event)
    }

    /// Reshape already-read file content.
    pub fn reshape_bytes(
        &self,
        bytes: &[u8],
        source_file: &str,
        group_key: &str,
        event: &EventInfo,
    ) -> Result<FileReshape, ReshapeError> {
        let window = event.window().ok_or(ReshapeError::EmptyWindow)?;
        let text = self.decode(bytes)?;

        let (header_lines, body) = split_header(&text)?;
        let header = header_lines
            .into_iter()
            .map(parse_header_line)
            .collect::<Result<Vec<_>, _>>()?;

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());

        let plan = plan_columns(source_file, &header[0], &header[1], &header[2])?;
        let mut out = FileReshape {
            source_file: source_file.to_string(),
            channels: plan.kept.iter().map(|(_, c)| c.clone()).collect(),
            placeholder_columns: plan.placeholder_columns,
            duplicate_sensor_ids: plan.duplicate_sensor_ids.clone(),
            ..FileReshape::default()
        };

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    let line = file_line(err.position());
                    out.malformed.push(MalformedRow {
                        line,
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            if is_blank(&record) {
                continue;
            }
            let line = file_line(record.position());

            match melt_row(&record, &plan, &window) {
                Ok(Some((timestamp, values))) => {
                    out.readings.extend(values.into_iter().map(|(sensor_id, value)| {
                        SensorReading {
                            timestamp,
                            sensor_id,
                            value,
                            source_file: source_file.to_string(),
                            event_label: event.label.clone(),
                            group_key: group_key.to_string(),
                        }
                    }));
                }
                Ok(None) => out.rows_outside_window += 1,
                Err(detail) => out.malformed.push(MalformedRow { line, detail }),
            }
        }

        Ok(out)
    }

    fn decode<'b>(&self, bytes: &'b [u8]) -> Result<Cow<'b, str>, ReshapeError> {
        let (text, had_errors) = self.encoding.decode_with_bom_removal(bytes);
        if had_errors {
            return Err(ReshapeError::Decode(self.encoding.name()));
        }
        // A UTF-8 BOM survives decoding when the file claims another encoding.
        Ok(match text {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim_start_matches('\u{feff}')),
            Cow::Owned(s) if s.starts_with('\u{feff}') => {
                Cow::Owned(s.trim_start_matches('\u{feff}').to_string())
            }
            owned => owned,
        })
    }
}

/// Split off the first three physical lines. Blank lines count as header
/// rows; `csv` would skip them and shift the column alignment.
fn split_header(text: &str) -> Result<(Vec<&str>, &str), ReshapeError> {
    let mut lines = Vec::with_capacity(HEADER_ROWS);
    let mut rest = text;
    while lines.len() < HEADER_ROWS {
        if rest.is_empty() {
            return Err(ReshapeError::Header(format!(
                "expected {} header rows, found {}",
                HEADER_ROWS,
                lines.len()
            )));
        }
        let (line, tail) = match rest.find('\n') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        lines.push(line.trim_end_matches('\r'));
        rest = tail;
    }
    Ok((lines, rest))
}

fn parse_header_line(line: &str) -> Result<StringRecord, ReshapeError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => Ok(record),
        Some(Err(err)) => Err(ReshapeError::Header(err.to_string())),
        None => Ok(StringRecord::new()),
    }
}

/// Body positions restart at line 1 after the header.
fn file_line(position: Option<&csv::Position>) -> u64 {
    position.map(|p| p.line() + HEADER_ROWS as u64).unwrap_or(0)
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|cell| cell.trim().is_empty())
}

/// Number of cells once trailing empty cells are dropped.
fn trimmed_len(record: &StringRecord) -> usize {
    record
        .iter()
        .enumerate()
        .filter(|(_, cell)| !cell.trim().is_empty())
        .last()
        .map(|(i, _)| i + 1)
        .unwrap_or(0)
}

fn plan_columns(
    source_file: &str,
    categories: &StringRecord,
    sensor_ids: &StringRecord,
    units: &StringRecord,
) -> Result<HeaderPlan, ReshapeError> {
    let width = trimmed_len(sensor_ids);
    if width < 2 {
        return Err(ReshapeError::Header(
            "sensor id row has no sensor columns".to_string(),
        ));
    }

    let cell = |record: &StringRecord, i: usize| record.get(i).unwrap_or("").trim().to_string();

    let mut seen = HashSet::new();
    let mut plan = HeaderPlan {
        kept: Vec::new(),
        placeholder_columns: 0,
        duplicate_sensor_ids: Vec::new(),
    };

    for i in 1..width {
        let sensor_id = cell(sensor_ids, i);
        if sensor_id.is_empty() || sensor_id == PLACEHOLDER_ID {
            plan.placeholder_columns += 1;
            continue;
        }
        if !seen.insert(sensor_id.clone()) {
            if !plan.duplicate_sensor_ids.contains(&sensor_id) {
                plan.duplicate_sensor_ids.push(sensor_id);
            }
            continue;
        }
        plan.kept.push((
            i,
            SensorChannel {
                source_file: source_file.to_string(),
                sensor_id,
                category: cell(categories, i),
                unit: cell(units, i),
            },
        ));
    }

    Ok(plan)
}

/// `Ok(None)` when the row is outside the window; `Err` with a reason when
/// the row is malformed.
fn melt_row(
    record: &StringRecord,
    plan: &HeaderPlan,
    window: &TimeSpan,
) -> Result<Option<(NaiveDateTime, Vec<(String, f64)>)>, String> {
    let raw_ts = record.get(0).unwrap_or("");
    let timestamp =
        parse_timestamp(raw_ts).ok_or_else(|| format!("unparseable timestamp '{}'", raw_ts.trim()))?;
    if !window.contains(timestamp) {
        return Ok(None);
    }

    let mut values = Vec::with_capacity(plan.kept.len());
    for (i, channel) in &plan.kept {
        let raw = record.get(*i).unwrap_or("").trim();
        if raw.is_empty() {
            continue;
        }
        let value: f64 = raw.parse().map_err(|_| {
            format!("unparseable value '{}' for sensor {}", raw, channel.sensor_id)
        })?;
        values.push((channel.sensor_id.clone(), value));
    }
    Ok(Some((timestamp, values)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(start: &str, end: &str) -> EventInfo {
        EventInfo::new(
            "run1",
            parse_timestamp(start).unwrap(),
            parse_timestamp(end).unwrap(),
        )
    }

    fn day_event() -> EventInfo {
        event("2024-01-01 00:00", "2024-01-01 23:59")
    }

    fn reshape(text: &str, ev: &EventInfo) -> Result<FileReshape, ReshapeError> {
        Reshaper::new(encoding_rs::UTF_8).reshape_bytes(
            text.as_bytes(),
            "sensorA_2024-01-01.csv",
            "sensorA",
            ev,
        )
    }

    const SAMPLE: &str = "\
,Temp,Misc,Temp,Press,
,T1,-,T1,P1,
,degC,-,degC,kPa,
2024-01-01 00:00:00,20.5,x,99.9,101.3,
2024-01-01 00:01:00,20.6,x,99.9,,
";

    #[test]
    fn drops_placeholder_and_duplicate_columns() {
        let out = reshape(SAMPLE, &day_event()).unwrap();

        let ids: Vec<_> = out.channels.iter().map(|c| c.sensor_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "P1"]);
        assert_eq!(out.channels[0].category, "Temp");
        assert_eq!(out.channels[0].unit, "degC");
        assert_eq!(out.placeholder_columns, 1);
        assert_eq!(out.duplicate_sensor_ids, vec!["T1"]);

        assert!(out.readings.iter().all(|r| r.sensor_id != "-"));
        let t1: Vec<f64> = out
            .readings
            .iter()
            .filter(|r| r.sensor_id == "T1")
            .map(|r| r.value)
            .collect();
        assert_eq!(t1, vec![20.5, 20.6]);
        // Empty P1 cell on the second row is an absent reading.
        assert_eq!(out.readings.len(), 3);
        assert!(out.malformed.is_empty());
        assert!(out
            .readings
            .iter()
            .all(|r| r.event_label == "run1" && r.group_key == "sensorA"));
    }

    #[test]
    fn rows_outside_window_are_filtered() {
        let text = "\
,Temp
,T1
,degC
2023-12-31 23:59:59,1
2024-01-01 00:00:00,2
2024-01-01 00:30:00,3
";
        let ev = event("2024-01-01 00:00", "2024-01-01 00:30");
        let out = reshape(text, &ev).unwrap();

        let window = ev.window().unwrap();
        assert_eq!(out.readings.len(), 1);
        assert!(out.readings.iter().all(|r| window.contains(r.timestamp)));
        assert_eq!(out.rows_outside_window, 2);
    }

    #[test]
    fn malformed_rows_are_dropped_with_line_numbers() {
        let text = "\
,Temp,Temp
,T1,T2
,degC,degC
not a time,1,2
2024-01-01 00:00:00,abc,2
2024-01-01 00:01:00,3,4
";
        let out = reshape(text, &day_event()).unwrap();

        assert_eq!(out.readings.len(), 2);
        assert_eq!(out.malformed.len(), 2);
        assert_eq!(out.malformed[0].line, 4);
        assert!(out.malformed[0].detail.contains("timestamp"));
        assert_eq!(out.malformed[1].line, 5);
        assert!(out.malformed[1].detail.contains("T1"));
    }

    #[test]
    fn short_header_is_unreadable() {
        let err = reshape(",Temp\n,T1\n", &day_event()).unwrap_err();
        assert!(matches!(err, ReshapeError::Header(_)));

        let err = reshape(",,\n,,\n,,\n2024-01-01 00:00:00,1,2\n", &day_event()).unwrap_err();
        assert!(matches!(err, ReshapeError::Header(_)));
    }

    #[test]
    fn blank_header_line_keeps_its_row() {
        let text = "\n,T1,P1\n,degC,kPa\n2024-01-01 00:00:00,1,2\nbad,3,4\n";
        let out = reshape(text, &day_event()).unwrap();

        let ids: Vec<_> = out.channels.iter().map(|c| c.sensor_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "P1"]);
        assert_eq!(out.channels[0].category, "");
        assert_eq!(out.channels[1].unit, "kPa");
        assert_eq!(out.readings.len(), 2);
        assert_eq!(out.malformed.len(), 1);
        assert_eq!(out.malformed[0].line, 5);
    }

    #[test]
    fn header_cells_trailing_blanks_are_ignored() {
        let record = StringRecord::from(vec!["", "T1", "", "P1", " ", ""]);
        assert_eq!(trimmed_len(&record), 4);
        assert_eq!(trimmed_len(&StringRecord::from(vec!["", " "])), 0);
    }

    #[test]
    fn crlf_header_lines_are_trimmed() {
        let text = ",Temp\r\n,T1\r\n,degC\r\n2024-01-01 00:00:00,1\r\n";
        let out = reshape(text, &day_event()).unwrap();
        assert_eq!(out.channels[0].unit, "degC");
        assert_eq!(out.readings.len(), 1);
    }

    #[test]
    fn decodes_configured_encoding_and_strips_bom() {
        let text = ",温度\n,T1\n,℃\n2024-01-01 00:00:00,1.5\n";
        let (sjis, _, had_errors) = encoding_rs::SHIFT_JIS.encode(text);
        assert!(!had_errors);

        let out = Reshaper::new(encoding_rs::SHIFT_JIS)
            .reshape_bytes(&sjis, "a.csv", "a", &day_event())
            .unwrap();
        assert_eq!(out.channels[0].category, "温度");
        assert_eq!(out.channels[0].unit, "℃");

        let mut with_bom = vec![0xEF, 0xBB, 0xBF];
        with_bom.extend_from_slice(b",Temp\n,T1\n,degC\n2024-01-01 00:00:00,1\n");
        let out = Reshaper::new(encoding_rs::UTF_8)
            .reshape_bytes(&with_bom, "b.csv", "b", &day_event())
            .unwrap();
        assert_eq!(out.readings.len(), 1);
    }

    #[test]
    fn undecodable_text_is_an_error() {
        let bytes = b",Temp\n,T1\n,deg\xff\n2024-01-01 00:00:00,1\n";
        let err = Reshaper::new(encoding_rs::UTF_8)
            .reshape_bytes(bytes, "a.csv", "a", &day_event())
            .unwrap_err();
        assert!(matches!(err, ReshapeError::Decode("UTF-8")));
    }
}
