//! Field and column definitions.

use crate::types::SqlType;
use crate::value::Value;

/// Metadata about a scalar field of a persistent class.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Field name, also used as the column name
    pub name: String,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Whether this field may hold NULL
    pub nullable: bool,
    /// Whether this field has a unique constraint on its own
    pub unique: bool,
    /// Value assigned when an object is created without one
    pub default: Option<Value>,
}

impl FieldInfo {
    /// Create a new non-nullable field with no default.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            unique: false,
            default: None,
        }
    }

    /// Set nullable flag.
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set unique flag.
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set the value given to newly created objects.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value a fresh object starts with for this field.
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let field = FieldInfo::new("email", SqlType::Text)
            .nullable(true)
            .unique(true);
        assert_eq!(field.name, "email");
        assert!(field.nullable);
        assert!(field.unique);
        assert_eq!(field.initial_value(), Value::Null);
    }

    #[test]
    fn default_value() {
        let field = FieldInfo::new("score", SqlType::BigInt).default(10);
        assert_eq!(field.initial_value(), Value::BigInt(10));
    }
}
