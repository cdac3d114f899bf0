//! Accessors for loosely typed JSON report bodies.

use serde_json::{Map, Value};
use toolport_core::time::parse_iso8601;

use super::IngestError;

pub(super) type Body = Map<String, Value>;

pub(super) fn as_object(body: &Value) -> Result<&Body, IngestError> {
    body.as_object()
        .ok_or_else(|| IngestError::Invalid("Invalid JSON body".to_string()))
}

/// A non-empty string field.
pub(super) fn required_str<'a>(body: &'a Body, field: &str) -> Result<&'a str, IngestError> {
    match body.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(IngestError::Invalid(format!(
            "{field} is required and must be a string"
        ))),
    }
}

/// A string field whose value must be one of `allowed`.
pub(super) fn one_of<'a>(
    body: &'a Body,
    field: &str,
    allowed: &[&'static str],
) -> Result<&'a str, IngestError> {
    match body.get(field).and_then(Value::as_str) {
        Some(s) if allowed.contains(&s) => Ok(s),
        _ => {
            let choices = allowed
                .iter()
                .map(|a| format!("'{a}'"))
                .collect::<Vec<_>>()
                .join(" or ");
            Err(IngestError::Invalid(format!("{field} must be {choices}")))
        }
    }
}

/// Optional string; empty and non-string values count as absent.
pub(super) fn optional_str<'a>(body: &'a Body, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Optional integer. `null` is absent, anything else must be a whole number.
pub(super) fn optional_int(body: &Body, field: &str) -> Result<Option<i64>, IngestError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| IngestError::Invalid(format!("{field} must be an integer"))),
    }
}

/// Optional ISO 8601 timestamp as Unix seconds.
pub(super) fn optional_time(body: &Body, field: &str) -> Result<Option<i64>, IngestError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => parse_iso8601(s).map(Some).map_err(|_| invalid_date(field)),
        Some(_) => Err(invalid_date(field)),
    }
}

pub(super) fn invalid_date(field: &str) -> IngestError {
    IngestError::Invalid(format!("{field} must be a valid ISO 8601 date"))
}
