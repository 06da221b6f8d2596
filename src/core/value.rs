//! [`TransactionValue`]: the tagged union carried by operations, variables
//! and object data. Numeric tags match `transaction.pb.go`'s field
//! numbers exactly, so the wire encoding in [`crate::txn::wire`] can use
//! them directly as protobuf field tags.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const VAL_INT: u32 = 5;
pub const VAL_BOOL: u32 = 6;
pub const VAL_FLOAT32: u32 = 7;
pub const VAL_FLOAT64: u32 = 8;
pub const VAL_STRING: u32 = 9;
pub const VAL_BYTES: u32 = 10;
pub const VAL_JSON: u32 = 11;
pub const VAL_NULL: u32 = 12;

/// A scalar or structured value flowing through a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TransactionValue {
    Int(i64),
    Bool(bool),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
    Null,
}

impl TransactionValue {
    /// The wire tag this value would be encoded under.
    pub fn tag(&self) -> u32 {
        match self {
            TransactionValue::Int(_) => VAL_INT,
            TransactionValue::Bool(_) => VAL_BOOL,
            TransactionValue::Float32(_) => VAL_FLOAT32,
            TransactionValue::Float64(_) => VAL_FLOAT64,
            TransactionValue::String(_) => VAL_STRING,
            TransactionValue::Bytes(_) => VAL_BYTES,
            TransactionValue::Json(_) => VAL_JSON,
            TransactionValue::Null => VAL_NULL,
        }
    }

    /// Convert to the JSON representation objects are stored as.
    pub fn to_json(&self) -> JsonValue {
        match self {
            TransactionValue::Int(v) => JsonValue::from(*v),
            TransactionValue::Bool(v) => JsonValue::from(*v),
            TransactionValue::Float32(v) => JsonValue::from(*v as f64),
            TransactionValue::Float64(v) => JsonValue::from(*v),
            TransactionValue::String(v) => JsonValue::from(v.clone()),
            TransactionValue::Bytes(v) => {
                JsonValue::Array(v.iter().map(|b| JsonValue::from(*b)).collect())
            }
            TransactionValue::Json(v) => v.clone(),
            TransactionValue::Null => JsonValue::Null,
        }
    }

    /// Best-effort conversion back from the JSON representation objects
    /// are stored as. Used when reading a nested value back out via
    /// [`crate::core::walk`] into a `Get`/`Return` destination.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => TransactionValue::Null,
            JsonValue::Bool(b) => TransactionValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TransactionValue::Int(i)
                } else {
                    TransactionValue::Float64(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => TransactionValue::String(s),
            other => TransactionValue::Json(other),
        }
    }

    /// Render as a string, mirroring the single case (`string`) the
    /// original implementation ever actually filled in for
    /// `TransactionValue.String()`, generalized to every variant here.
    pub fn as_display_string(&self) -> String {
        match self {
            TransactionValue::Int(v) => v.to_string(),
            TransactionValue::Bool(v) => v.to_string(),
            TransactionValue::Float32(v) => v.to_string(),
            TransactionValue::Float64(v) => v.to_string(),
            TransactionValue::String(v) => v.clone(),
            TransactionValue::Bytes(v) => format!("{v:?}"),
            TransactionValue::Json(v) => v.to_string(),
            TransactionValue::Null => "null".to_string(),
        }
    }
}

impl std::fmt::Display for TransactionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_display_string())
    }
}

impl From<&str> for TransactionValue {
    fn from(s: &str) -> Self {
        TransactionValue::String(s.to_string())
    }
}

impl From<i64> for TransactionValue {
    fn from(v: i64) -> Self {
        TransactionValue::Int(v)
    }
}

impl From<bool> for TransactionValue {
    fn from(v: bool) -> Self {
        TransactionValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_protobuf_field_numbers() {
        assert_eq!(TransactionValue::Int(1).tag(), 5);
        assert_eq!(TransactionValue::Bool(true).tag(), 6);
        assert_eq!(TransactionValue::Float32(1.0).tag(), 7);
        assert_eq!(TransactionValue::Float64(1.0).tag(), 8);
        assert_eq!(TransactionValue::String("x".into()).tag(), 9);
        assert_eq!(TransactionValue::Bytes(vec![]).tag(), 10);
        assert_eq!(TransactionValue::Json(JsonValue::Null).tag(), 11);
        assert_eq!(TransactionValue::Null.tag(), 12);
    }

    #[test]
    fn json_round_trip_for_scalars() {
        let v = TransactionValue::String("hello".into());
        assert_eq!(TransactionValue::from_json(v.to_json()), v);
    }
}
