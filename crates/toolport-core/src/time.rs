//! ISO 8601 timestamp parsing for externally reported times.
//!
//! Scheduled jobs report times as ISO 8601 strings; storage keeps Unix
//! seconds. Offsets are honoured, timestamps without an offset are UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO 8601 timestamp into Unix seconds.
///
/// Accepts RFC 3339 (`2025-01-31T09:00:00+09:00`, `...Z`), a date-time
/// without offset (read as UTC) and a bare date (midnight UTC).
pub fn parse_iso8601(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Timestamp("empty timestamp".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp());
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, fmt) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    Err(Error::Timestamp(input.to_string()))
}
