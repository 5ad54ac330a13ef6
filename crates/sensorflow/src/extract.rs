//! Read side of the sensor store.

use crate::error::Result;
use crate::store::SensorStore;
use chrono::NaiveDateTime;
use sensorflow_db::DbValue;
use serde::Serialize;
use std::collections::BTreeMap;

/// Which readings to return. Every set field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub event_label: Option<String>,
    /// Inclusive lower bound
    pub from: Option<NaiveDateTime>,
    /// Exclusive upper bound
    pub to: Option<NaiveDateTime>,
    pub sensor_ids: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub timestamp: NaiveDateTime,
    pub sensor_id: String,
    pub value: Option<f64>,
    pub source_file: String,
    pub event_label: String,
}

/// One row per timestamp, one column per sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WideTable {
    pub columns: Vec<String>,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WideRow {
    pub timestamp: NaiveDateTime,
    /// Aligned with [`WideTable::columns`]
    pub values: Vec<Option<f64>>,
}

/// Query readings ordered by (timestamp, sensor_id, source_file).
pub fn query_readings(store: &SensorStore, filter: &ReadingFilter) -> Result<Vec<StoredReading>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<DbValue> = Vec::new();

    if let Some(label) = &filter.event_label {
        clauses.push("event_label = ?".to_string());
        params.push(label.as_str().into());
    }
    if let Some(from) = filter.from {
        clauses.push("timestamp >= ?".to_string());
        params.push(from.into());
    }
    if let Some(to) = filter.to {
        clauses.push("timestamp < ?".to_string());
        params.push(to.into());
    }
    if !filter.sensor_ids.is_empty() {
        let placeholders = vec!["?"; filter.sensor_ids.len()].join(", ");
        clauses.push(format!("sensor_id IN ({})", placeholders));
        params.extend(filter.sensor_ids.iter().map(|id| DbValue::from(id.as_str())));
    }

    let mut sql = String::from(
        "SELECT timestamp, sensor_id, value, source_file, event_label FROM sensor_data",
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY timestamp, sensor_id, source_file");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    store
        .conn()
        .query_all(&sql, &params)?
        .into_iter()
        .map(|row| {
            Ok(StoredReading {
                timestamp: row.get(0)?,
                sensor_id: row.get(1)?,
                value: row.get(2)?,
                source_file: row.get(3)?,
                event_label: row.get(4)?,
            })
        })
        .collect()
}

/// Pivot long readings back to a wide table. Sensor columns are sorted by
/// id. When two source files carry the same sensor at the same instant the
/// first reading in input order wins.
pub fn pivot_wide(readings: &[StoredReading]) -> WideTable {
    let mut column_index: BTreeMap<&str, usize> = BTreeMap::new();
    for reading in readings {
        column_index.entry(reading.sensor_id.as_str()).or_insert(0);
    }
    for (position, index) in column_index.values_mut().enumerate() {
        *index = position;
    }

    let width = column_index.len();
    let mut by_time: BTreeMap<NaiveDateTime, Vec<Option<f64>>> = BTreeMap::new();
    for reading in readings {
        let slot = column_index[reading.sensor_id.as_str()];
        let values = by_time
            .entry(reading.timestamp)
            .or_insert_with(|| vec![None; width]);
        if values[slot].is_none() {
            values[slot] = reading.value;
        }
    }

    WideTable {
        columns: column_index.keys().map(|id| id.to_string()).collect(),
        rows: by_time
            .into_iter()
            .map(|(timestamp, values)| WideRow { timestamp, values })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::SensorReading;
    use crate::timespan::parse_timestamp;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn seeded_store() -> SensorStore {
        let store = SensorStore::open_in_memory().unwrap();
        let rows: Vec<SensorReading> = [
            ("2024-01-01 00:00", "T1", 1.0, "run1"),
            ("2024-01-01 00:00", "P1", 10.0, "run1"),
            ("2024-01-01 00:01", "T1", 2.0, "run1"),
            ("2024-01-02 00:00", "T1", 3.0, "run2"),
        ]
        .into_iter()
        .map(|(t, sensor, value, event)| SensorReading {
            timestamp: ts(t),
            sensor_id: sensor.to_string(),
            value,
            source_file: "sensorA.csv".to_string(),
            event_label: event.to_string(),
            group_key: "sensorA".to_string(),
        })
        .collect();
        store.register(&rows).unwrap();
        store
    }

    #[test]
    fn filters_narrow_the_result() {
        let store = seeded_store();

        let all = query_readings(&store, &ReadingFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].sensor_id, "P1");

        let run1_t1 = query_readings(
            &store,
            &ReadingFilter {
                event_label: Some("run1".to_string()),
                sensor_ids: vec!["T1".to_string()],
                ..ReadingFilter::default()
            },
        )
        .unwrap();
        let values: Vec<_> = run1_t1.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0)]);

        let window = query_readings(
            &store,
            &ReadingFilter {
                from: Some(ts("2024-01-01 00:01")),
                to: Some(ts("2024-01-02 00:00")),
                ..ReadingFilter::default()
            },
        )
        .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].timestamp, ts("2024-01-01 00:01"));

        let limited = query_readings(
            &store,
            &ReadingFilter {
                limit: Some(2),
                ..ReadingFilter::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn pivot_aligns_sensors_per_timestamp() {
        let store = seeded_store();
        let readings = query_readings(
            &store,
            &ReadingFilter {
                event_label: Some("run1".to_string()),
                ..ReadingFilter::default()
            },
        )
        .unwrap();

        let wide = pivot_wide(&readings);
        assert_eq!(wide.columns, vec!["P1", "T1"]);
        assert_eq!(wide.rows.len(), 2);
        assert_eq!(wide.rows[0].values, vec![Some(10.0), Some(1.0)]);
        assert_eq!(wide.rows[1].timestamp, ts("2024-01-01 00:01"));
        assert_eq!(wide.rows[1].values, vec![None, Some(2.0)]);
    }
}
