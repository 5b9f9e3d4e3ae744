//! Flat search filters.

use crate::value::Value;

/// AND-only equality filters. A `Null` value matches `IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    filters: Vec<(String, Value)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column = value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Does a row, read through `lookup`, satisfy every filter?
    pub fn matches<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> bool {
        self.filters
            .iter()
            .all(|(column, expected)| match lookup(column) {
                Some(actual) if expected.is_null() => actual.is_null(),
                Some(actual) => actual == expected,
                None => expected.is_null(),
            })
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn null_filter_matches_missing_and_null() {
        let mut row = HashMap::new();
        row.insert("name".to_string(), Value::from("Ann"));
        row.insert("nick".to_string(), Value::Null);

        let criteria = Criteria::new().eq("name", "Ann").eq("nick", Value::Null);
        assert!(criteria.matches(|c| row.get(c)));
        assert!(Criteria::new().eq("missing", Value::Null).matches(|c| row.get(c)));
        assert!(!Criteria::new().eq("name", "Bob").matches(|c| row.get(c)));
    }
}
