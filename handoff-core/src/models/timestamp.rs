//! Canonical timestamps: `i64` milliseconds since the Unix epoch.
//!
//! Older widgets send cursors as RFC 3339 strings, numeric strings, or epoch
//! seconds. Everything is normalized here, at the wire boundary, so the rest
//! of the crate only ever sees millis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Values below this are taken to be epoch seconds (10^11 ms is early 1973).
const SECONDS_THRESHOLD: i64 = 100_000_000_000;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalize a numeric epoch value (seconds or millis) to millis.
pub fn from_epoch(value: i64) -> i64 {
    if value.abs() < SECONDS_THRESHOLD {
        value * 1000
    } else {
        value
    }
}

/// Parse a textual timestamp: an integer (seconds or millis), a float, or RFC 3339.
pub fn parse(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(from_epoch(n));
    }
    if let Ok(f) = text.parse::<f64>() {
        return from_float(f);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

fn from_float(f: f64) -> Option<i64> {
    if !f.is_finite() {
        return None;
    }
    if f.abs() < SECONDS_THRESHOLD as f64 {
        Some((f * 1000.0).round() as i64)
    } else {
        Some(f.round() as i64)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    fn normalize(self) -> Option<i64> {
        match self {
            RawTimestamp::Int(n) => Some(from_epoch(n)),
            RawTimestamp::Float(f) => from_float(f),
            RawTimestamp::Text(s) => parse(&s),
        }
    }
}

/// `deserialize_with` helper for required timestamp fields.
pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    RawTimestamp::deserialize(deserializer)?
        .normalize()
        .ok_or_else(|| serde::de::Error::custom("unrecognized timestamp"))
}

/// `deserialize_with` helper for optional timestamp fields. Unparseable or
/// empty values become `None` so a bad cursor degrades to a first attach.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    Ok(raw.and_then(RawTimestamp::normalize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Cursor {
        #[serde(default, deserialize_with = "deserialize_option")]
        ts: Option<i64>,
    }

    fn cursor(json: &str) -> Option<i64> {
        serde_json::from_str::<Cursor>(json).unwrap().ts
    }

    #[test]
    fn test_millis_pass_through() {
        assert_eq!(cursor(r#"{"ts": 1700000000123}"#), Some(1_700_000_000_123));
    }

    #[test]
    fn test_seconds_are_scaled() {
        assert_eq!(cursor(r#"{"ts": 1700000000}"#), Some(1_700_000_000_000));
        assert_eq!(cursor(r#"{"ts": 1700000000.5}"#), Some(1_700_000_000_500));
    }

    #[test]
    fn test_strings_are_normalized() {
        assert_eq!(cursor(r#"{"ts": "1700000000123"}"#), Some(1_700_000_000_123));
        assert_eq!(
            cursor(r#"{"ts": "2023-11-14T22:13:20.123Z"}"#),
            Some(1_700_000_000_123)
        );
    }

    #[test]
    fn test_missing_null_and_garbage_are_none() {
        assert_eq!(cursor(r#"{}"#), None);
        assert_eq!(cursor(r#"{"ts": null}"#), None);
        assert_eq!(cursor(r#"{"ts": "yesterday"}"#), None);
        assert_eq!(cursor(r#"{"ts": ""}"#), None);
    }
}
