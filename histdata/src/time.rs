//! Parsing of caller-supplied time bounds

use crate::data::{Interval, TimeRange};
use crate::error::{HistoryError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Epoch milliseconds from `YYYY-MM-DD`, a naive UTC datetime, RFC 3339,
/// or a bare integer that already is epoch milliseconds.
pub fn parse_time(raw: &str) -> Result<i64> {
    let s = raw.trim();
    if !s.is_empty() && s.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .map_err(|e| HistoryError::InvalidRange(format!("{:?}: {}", raw, e)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight).timestamp_millis());
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    Err(HistoryError::InvalidRange(format!(
        "cannot parse {:?} as a date, datetime or epoch milliseconds",
        raw
    )))
}

/// Open times covered by `[start, end)`: `[align_up(start), align_down(end - 1)]`
pub fn requested_span(interval: Interval, start: i64, end: i64) -> Result<TimeRange> {
    if start >= end {
        return Err(HistoryError::InvalidRange(format!(
            "start {} is not before end {}",
            format_time(start),
            format_time(end)
        )));
    }
    let span = TimeRange::new(interval.align_up(start), interval.align_down(end - 1));
    if span.end < span.start {
        return Err(HistoryError::InvalidRange(format!(
            "no {} bar opens within [{}, {})",
            interval,
            format_time(start),
            format_time(end)
        )));
    }
    Ok(span)
}

/// RFC 3339 rendering of epoch milliseconds, falling back to the raw number
pub fn format_time(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAN1: i64 = 1_704_067_200_000;

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("2024-01-01").unwrap(), JAN1);
        assert_eq!(parse_time("2024-01-01T00:15:00").unwrap(), JAN1 + 900_000);
        assert_eq!(parse_time("2024-01-01 00:15:00").unwrap(), JAN1 + 900_000);
        assert_eq!(parse_time("2024-01-01 00:15").unwrap(), JAN1 + 900_000);
        assert_eq!(parse_time("2024-01-01T02:00:00+02:00").unwrap(), JAN1);
        assert_eq!(parse_time("2024-01-01T00:00:00Z").unwrap(), JAN1);
        assert_eq!(parse_time(" 1704067200000 ").unwrap(), JAN1);
        assert!(matches!(parse_time("yesterday"), Err(HistoryError::InvalidRange(_))));
        assert!(parse_time("").is_err());
    }

    #[test]
    fn test_requested_span_is_end_exclusive() {
        let day = parse_time("2024-01-02").unwrap();
        let span = requested_span(Interval::FifteenMinutes, JAN1, day).unwrap();
        assert_eq!(span, TimeRange::new(JAN1, day - 900_000));
        assert_eq!(span.bar_count(Interval::FifteenMinutes), 96);
    }

    #[test]
    fn test_requested_span_aligns_inwards() {
        let span = requested_span(Interval::OneHour, JAN1 + 1, JAN1 + 7_200_001).unwrap();
        assert_eq!(span, TimeRange::new(JAN1 + 3_600_000, JAN1 + 7_200_000));

        assert!(requested_span(Interval::OneHour, JAN1, JAN1).is_err());
        assert!(requested_span(Interval::OneHour, JAN1 + 1, JAN1 + 1_000).is_err());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(JAN1), "2024-01-01T00:00:00+00:00");
    }
}
