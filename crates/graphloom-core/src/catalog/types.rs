//! Core type definitions for the catalog.

use graphloom_proto::Value;
use serde::{Deserialize, Serialize};

/// Scalar property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    /// Node identifier (string encoded).
    Id,
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean value.
    Boolean,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
}

impl PropertyType {
    /// Check if this type supports the string operators (`startsWith`, ...).
    pub fn is_textual(&self) -> bool {
        matches!(self, PropertyType::Id | PropertyType::String)
    }

    /// Convert a JSON input scalar into a value of this type.
    ///
    /// Returns `None` if the input does not fit. JSON `null` is always accepted.
    pub fn coerce(&self, json: &serde_json::Value) -> Option<Value> {
        if json.is_null() {
            return Some(Value::Null);
        }
        match self {
            PropertyType::Id | PropertyType::String => {
                json.as_str().map(|s| Value::String(s.to_string()))
            }
            PropertyType::Int => json.as_i64().map(Value::Int64),
            PropertyType::Float => json.as_f64().map(Value::Float64),
            PropertyType::Boolean => json.as_bool().map(Value::Bool),
            PropertyType::Timestamp => json.as_i64().map(Value::Timestamp),
        }
    }

    /// Check that a runtime value is compatible with this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (PropertyType::Id, Value::String(_))
                | (PropertyType::String, Value::String(_))
                | (PropertyType::Int, Value::Int64(_))
                | (PropertyType::Float, Value::Float64(_))
                | (PropertyType::Float, Value::Int64(_))
                | (PropertyType::Boolean, Value::Bool(_))
                | (PropertyType::Timestamp, Value::Timestamp(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce() {
        assert_eq!(PropertyType::Int.coerce(&json!(3)), Some(Value::Int64(3)));
        assert_eq!(PropertyType::Float.coerce(&json!(3)), Some(Value::Float64(3.0)));
        assert_eq!(PropertyType::String.coerce(&json!("x")), Some(Value::String("x".into())));
        assert_eq!(PropertyType::Boolean.coerce(&json!(null)), Some(Value::Null));
        assert_eq!(PropertyType::Int.coerce(&json!("3")), None);
        assert_eq!(PropertyType::Timestamp.coerce(&json!(10)), Some(Value::Timestamp(10)));
    }

    #[test]
    fn test_accepts() {
        assert!(PropertyType::Float.accepts(&Value::Int64(1)));
        assert!(!PropertyType::Int.accepts(&Value::String("1".into())));
        assert!(PropertyType::Boolean.accepts(&Value::Null));
    }

    #[test]
    fn test_textual() {
        assert!(PropertyType::Id.is_textual());
        assert!(!PropertyType::Int.is_textual());
    }
}
