//! Value encoding and decoding between Keepsake and SQLite.
//!
//! SQLite has five storage classes. Values map onto them as follows:
//!
//! | Value | SQLite |
//! |-------|--------|
//! | `Bool` | INTEGER (0/1) |
//! | `BigInt`, `TimestampTz` | INTEGER (timestamps as microseconds) |
//! | `Double` | REAL |
//! | `Text`, `Json` | TEXT |
//! | `Bytes`, `Uuid` | BLOB |
//!
//! Reads return the raw storage class; `SqlType::inflate` turns them back
//! into the declared variant.

use crate::ffi;
use keepsake_core::{Error, QueryError, QueryErrorKind, Result, SqlType, Value};
use std::ffi::{CStr, c_int};

/// Column type used in generated DDL.
pub fn column_type(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Boolean | SqlType::BigInt | SqlType::TimestampTz => "INTEGER",
        SqlType::Double => "REAL",
        SqlType::Text | SqlType::Json => "TEXT",
        SqlType::Blob | SqlType::Uuid => "BLOB",
    }
}

fn bind_bytes(stmt: *mut ffi::sqlite3_stmt, index: c_int, bytes: &[u8], text: bool) -> Result<c_int> {
    let len = c_int::try_from(bytes.len()).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: None,
            message: format!("parameter {} is too large to bind ({} bytes)", index, bytes.len()),
            source: None,
        })
    })?;
    // SAFETY: stmt is valid per caller; SQLITE_TRANSIENT makes sqlite copy the buffer
    let rc = unsafe {
        if text {
            ffi::sqlite3_bind_text(stmt, index, bytes.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
        } else {
            ffi::sqlite3_bind_blob(stmt, index, bytes.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
        }
    };
    Ok(rc)
}

/// Bind a value to a 1-based statement parameter. Returns the sqlite result code.
///
/// # Safety
/// `stmt` must be a valid, non-null prepared statement handle.
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> Result<c_int> {
    // SAFETY: caller guarantees stmt is valid
    let rc = unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*b)),
            Value::BigInt(v) | Value::TimestampTz(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => return bind_bytes(stmt, index, s.as_bytes(), true),
            Value::Json(json) => {
                let text = serde_json::to_string(json)?;
                return bind_bytes(stmt, index, text.as_bytes(), true);
            }
            Value::Bytes(b) => return bind_bytes(stmt, index, b, false),
            Value::Uuid(bytes) => return bind_bytes(stmt, index, bytes, false),
            Value::Array(_) => ffi::SQLITE_MISMATCH,
        }
    };
    Ok(rc)
}

/// Read a column of the current result row.
///
/// # Safety
/// `stmt` must be a valid statement that has just returned `SQLITE_ROW`, and
/// `index` a valid 0-based column index.
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller guarantees stmt is positioned on a row
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::BigInt(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, index)).unwrap_or(0);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice = std::slice::from_raw_parts(ptr, len);
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, index)).unwrap_or(0);
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    Value::Bytes(std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec())
                }
            }
            _ => Value::Null,
        }
    }
}

/// Name of a result column.
///
/// # Safety
/// `stmt` must be a valid prepared statement and `index` a valid column index.
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller guarantees stmt is valid
    let ptr = unsafe { ffi::sqlite3_column_name(stmt, index) };
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null names are NUL-terminated and live until the next step
        unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_types() {
        assert_eq!(column_type(SqlType::Boolean), "INTEGER");
        assert_eq!(column_type(SqlType::TimestampTz), "INTEGER");
        assert_eq!(column_type(SqlType::Double), "REAL");
        assert_eq!(column_type(SqlType::Json), "TEXT");
        assert_eq!(column_type(SqlType::Uuid), "BLOB");
    }
}
