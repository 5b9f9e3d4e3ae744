//! Rows handed back by a [`Storage`](crate::Storage) select.
//!
//! Every row of one result shares a single [`ColumnInfo`], so the name lookup
//! table is built once per query rather than once per row.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of a result, with a reverse index.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(position, name)| (name.clone(), position))
            .collect();
        Self { names, positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One stored row: values in select-column order.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    /// A standalone row owning its column list.
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of column `name`, or `None` if the select did not ask for it.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.values.get(self.columns.position(name)?)
    }

    /// Decode column `name` as `T`. Errors name the offending column.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let Some(value) = self.get_by_name(name) else {
            return Err(Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "no such column in row".to_string(),
                column: Some(name.to_string()),
            }));
        };
        match T::from_value(value) {
            Err(Error::Type(mut te)) => {
                te.column.get_or_insert_with(|| name.to_string());
                Err(Error::Type(te))
            }
            other => other,
        }
    }

    /// `(column, value)` pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(&self.values)
    }
}

/// Decoding of a single column value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_bytes() {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

/// `Null` decodes as `None`.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero_row() -> Row {
        Row::new(
            vec!["id".into(), "owner_id".into(), "name".into()],
            vec![Value::from("h1"), Value::Null, Value::from("Deadpond")],
        )
    }

    #[test]
    fn lookup_by_position_and_name() {
        let row = hero_row();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(2), Some(&Value::from("Deadpond")));
        assert_eq!(row.get_by_name("owner_id"), Some(&Value::Null));
        assert!(row.get_by_name("created_at").is_none());
    }

    #[test]
    fn typed_access_names_the_column() {
        let row = hero_row();
        let name: String = row.get_named("name").unwrap();
        assert_eq!(name, "Deadpond");
        let owner: Option<String> = row.get_named("owner_id").unwrap();
        assert!(owner.is_none());

        match row.get_named::<i64>("name") {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("name")),
            other => panic!("expected type error, got {other:?}"),
        }
        match row.get_named::<String>("created_at") {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("created_at")),
            other => panic!("expected type error, got {other:?}"),
        }
    }

    #[test]
    fn pairs_follow_select_order() {
        let row = hero_row();
        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["id", "owner_id", "name"]);
    }
}
