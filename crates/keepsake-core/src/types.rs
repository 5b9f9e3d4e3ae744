//! Column types and the per-field encode/decode hooks.
//!
//! Backends return whatever their native storage class is (SQLite hands back
//! integers for booleans and timestamps, text for JSON). `SqlType::inflate`
//! normalizes those into the declared `Value` variant; `SqlType::deflate`
//! checks a value can be written to a column of this type at all.

use crate::error::{Error, TypeError};
use crate::value::Value;

/// Column types supported for scalar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    BigInt,
    Double,
    Text,
    Blob,
    TimestampTz,
    Uuid,
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        }
    }

    /// Decode a value read from storage into this column's canonical variant.
    pub fn inflate(&self, value: Value) -> crate::Result<Value> {
        let mismatch = |value: &Value| {
            Error::Type(TypeError {
                expected: self.sql_name(),
                actual: value.type_name().to_string(),
                column: None,
            })
        };

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (SqlType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (SqlType::Boolean, Value::BigInt(i)) => Ok(Value::Bool(i != 0)),
            (SqlType::BigInt, Value::BigInt(i)) => Ok(Value::BigInt(i)),
            (SqlType::BigInt, Value::Bool(b)) => Ok(Value::BigInt(i64::from(b))),
            (SqlType::Double, Value::Double(d)) => Ok(Value::Double(d)),
            (SqlType::Double, Value::BigInt(i)) => Ok(Value::Double(i as f64)),
            (SqlType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (SqlType::Blob, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (SqlType::Blob, Value::Text(s)) => Ok(Value::Bytes(s.into_bytes())),
            (SqlType::TimestampTz, Value::TimestampTz(t) | Value::BigInt(t)) => {
                Ok(Value::TimestampTz(t))
            }
            (SqlType::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
            (SqlType::Uuid, Value::Bytes(b)) => {
                let bytes: [u8; 16] = b.as_slice().try_into().map_err(|_| {
                    Error::Type(TypeError {
                        expected: "UUID",
                        actual: format!("BLOB of {} bytes", b.len()),
                        column: None,
                    })
                })?;
                Ok(Value::Uuid(bytes))
            }
            (SqlType::Json, Value::Json(j)) => Ok(Value::Json(j)),
            (SqlType::Json, Value::Text(s)) => Ok(Value::Json(serde_json::from_str(&s)?)),
            (_, other) => Err(mismatch(&other)),
        }
    }

    /// Check that `value` can be written to a column of this type.
    ///
    /// Returns the type name of the offending value on failure so callers can
    /// attach class and field context.
    pub fn deflate<'a>(&self, value: &'a Value) -> Result<&'a Value, &'static str> {
        let ok = match (self, value) {
            (_, Value::Null) => true,
            (_, Value::Array(_)) => false,
            (SqlType::Boolean, Value::Bool(_))
            | (SqlType::BigInt, Value::BigInt(_))
            | (SqlType::Double, Value::Double(_) | Value::BigInt(_))
            | (SqlType::Text, Value::Text(_))
            | (SqlType::Blob, Value::Bytes(_))
            | (SqlType::TimestampTz, Value::TimestampTz(_) | Value::BigInt(_))
            | (SqlType::Uuid, Value::Uuid(_))
            | (SqlType::Json, Value::Json(_)) => true,
            _ => false,
        };
        if ok { Ok(value) } else { Err(value.type_name()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflate_normalizes_backend_values() {
        assert_eq!(
            SqlType::Boolean.inflate(Value::BigInt(1)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            SqlType::TimestampTz.inflate(Value::BigInt(42)).unwrap(),
            Value::TimestampTz(42)
        );
        assert_eq!(
            SqlType::Json.inflate(Value::Text("{\"a\":1}".into())).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(SqlType::Text.inflate(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn inflate_rejects_mismatch() {
        assert!(matches!(
            SqlType::BigInt.inflate(Value::Text("x".into())),
            Err(Error::Type(_))
        ));
        assert!(SqlType::Uuid.inflate(Value::Bytes(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn deflate_refuses_arrays_and_mismatches() {
        let array = Value::Array(vec![Value::BigInt(1)]);
        assert_eq!(SqlType::Json.deflate(&array), Err("ARRAY"));
        assert_eq!(SqlType::BigInt.deflate(&Value::Text("1".into())), Err("TEXT"));
        assert!(SqlType::Double.deflate(&Value::BigInt(3)).is_ok());
        assert!(SqlType::Text.deflate(&Value::Null).is_ok());
    }
}
