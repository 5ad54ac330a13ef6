//! Half-open time windows and the timestamp formats sensors emit.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// A half-open interval `[start, end)` of zone-less timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSpan {
    /// Build a span; `None` unless `start < end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Half-open intersection test.
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Smallest span covering both.
    pub fn hull(&self, other: &TimeSpan) -> TimeSpan {
        TimeSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl std::fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a sensor or event timestamp.
///
/// Accepts `-` or `/` date separators, a space or `T` between date and time,
/// optional seconds and fractional seconds. A bare `YYYY-MM-DD` means
/// midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn parses_supported_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap();
        assert_eq!(at("2024-01-01 12:30:05"), expected);
        assert_eq!(at("2024/01/01 12:30:05"), expected);
        assert_eq!(at("2024-01-01T12:30:05"), expected);
        assert_eq!(at(" 2024-01-01 12:30:05 "), expected);
        assert_eq!(
            at("2024-01-01 12:30:05.250"),
            expected + chrono::Duration::milliseconds(250)
        );
        assert_eq!(at("2024-01-01 12:30"), expected - chrono::Duration::seconds(5));
        assert_eq!(at("2024-01-01"), at("2024-01-01 00:00:00"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-01 00:00:00").is_none());
    }

    #[test]
    fn overlap_is_half_open() {
        let a = TimeSpan::new(at("2024-01-01 00:00"), at("2024-01-01 01:00")).unwrap();
        let touching = TimeSpan::new(at("2024-01-01 01:00"), at("2024-01-01 02:00")).unwrap();
        let inside = TimeSpan::new(at("2024-01-01 00:30"), at("2024-01-01 00:31")).unwrap();

        assert!(!a.overlaps(&touching));
        assert!(!touching.overlaps(&a));
        assert!(a.overlaps(&inside));
        assert!(a.contains(at("2024-01-01 00:00")));
        assert!(!a.contains(at("2024-01-01 01:00")));
    }

    #[test]
    fn hull_and_empty_spans() {
        let a = TimeSpan::new(at("2024-01-01 00:00"), at("2024-01-01 01:00")).unwrap();
        let b = TimeSpan::new(at("2024-01-01 03:00"), at("2024-01-01 04:00")).unwrap();
        let hull = a.hull(&b);
        assert_eq!(hull.start, a.start);
        assert_eq!(hull.end, b.end);
        assert!(TimeSpan::new(a.start, a.start).is_none());
    }
}
