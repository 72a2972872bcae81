//! Lenient readers for the opaque conditions bag.
//!
//! Threshold values arrive from the dashboard as JSON and token amounts cross
//! the wire as decimal strings, so numbers are accepted in either shape.

use serde_json::Value;

/// Numeric condition, accepted as a JSON number or a numeric string
pub fn number(conditions: &Value, key: &str) -> Option<f64> {
    match conditions.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn number_or(conditions: &Value, key: &str, default: f64) -> f64 {
    number(conditions, key).unwrap_or(default)
}

pub fn boolean(conditions: &Value, key: &str) -> Option<bool> {
    conditions.get(key)?.as_bool()
}
