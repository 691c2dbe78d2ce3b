//! The property value domain (§4.2).
//!
//! Any JSON value is representable except `undefined`, which is reserved
//! to mean "delete this property". Implementations built on a typed host
//! language reject values outside this domain instead of silently
//! coercing them (functions, typed buffers, dates-as-non-strings, ...);
//! this crate's domain is closed by construction (a Rust enum), so the
//! validation that matters here is the reserved-key timestamp check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Error;

/// A property value. Mirrors JSON's data model: objects use a `BTreeMap`
/// so two equal maps always compare equal regardless of insertion order,
/// which matters for `compare_structure` (§3 invariant 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

/// Property keys reserved to hold an ISO-8601 timestamp string. `name`
/// is the one key the engine itself gives meaning to (path resolution,
/// §6); deployments may reserve additional timestamp keys by convention,
/// but only `name`'s sibling `created_at`/`updated_at` pair ships here
/// since nothing else in this crate's scope names one.
const TIMESTAMP_KEYS: &[&str] = &["created_at", "updated_at"];

/// Reject values that can't land in a timestamp-reserved key (§4.2).
pub fn validate_property(key: &str, value: &Value) -> Result<(), Error> {
    if TIMESTAMP_KEYS.contains(&key) {
        match value {
            Value::String(s) if is_iso8601(s) => {}
            Value::String(s) => {
                return Err(Error::InvalidValue {
                    key: key.to_string(),
                    reason: format!("{s:?} is not an ISO-8601 timestamp"),
                })
            }
            other => {
                return Err(Error::InvalidValue {
                    key: key.to_string(),
                    reason: format!("timestamp key requires a string, got {other:?}"),
                })
            }
        }
    }
    Ok(())
}

/// Minimal structural check: `YYYY-MM-DDTHH:MM:SS` with an optional
/// fractional second and an optional `Z`/`+HH:MM` offset. Not a full
/// RFC 3339 parser — good enough to reject obviously-wrong inputs like
/// a locale-formatted date string.
fn is_iso8601(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 19 {
        return false;
    }
    let digit = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);
    let literal = |i: usize, c: u8| bytes.get(i) == Some(&c);
    digit(0) && digit(1) && digit(2) && digit(3)
        && literal(4, b'-')
        && digit(5) && digit(6)
        && literal(7, b'-')
        && digit(8) && digit(9)
        && (literal(10, b'T') || literal(10, b' '))
        && digit(11) && digit(12)
        && literal(13, b':')
        && digit(14) && digit(15)
        && literal(16, b':')
        && digit(17) && digit(18)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_iso_timestamps() {
        assert!(validate_property("created_at", &Value::from("2026-08-01T12:00:00Z")).is_ok());
    }

    #[test]
    fn rejects_non_iso_timestamps() {
        assert!(validate_property("updated_at", &Value::from("08/01/2026")).is_err());
        assert!(validate_property("updated_at", &Value::Number(1.0)).is_err());
    }

    #[test]
    fn non_reserved_keys_accept_anything() {
        assert!(validate_property("size", &Value::Number(2048.0)).is_ok());
    }
}
