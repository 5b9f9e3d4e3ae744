//! CREATE/DROP TABLE statements for registered classes.
//!
//! Each class gets its own table holding the reserved columns, its
//! flattened fields and one TEXT column per has-one or weak relationship
//! (weak has-many columns hold a JSON id list). Owned children are found by
//! `owner_id`, so that column is indexed.

use crate::connection::SqliteStorage;
use crate::types::column_type;
use keepsake_core::{ClassInfo, ClassRegistry, Result, SqlType, Value, quote_ident};

/// Statements creating `class`'s table and its owner index.
pub fn create_table(class: &ClassInfo) -> Vec<String> {
    let table = class.table();
    let mut parts = Vec::new();

    for column in class.columns() {
        let quoted = quote_ident(column);
        let def = match column.as_str() {
            "id" => format!("{} TEXT NOT NULL PRIMARY KEY", quoted),
            "owner_class" | "owner_id" => format!("{} TEXT", quoted),
            "created_at" => format!("{} INTEGER NOT NULL", quoted),
            name => match class.field(name) {
                Some(field) => {
                    let mut def = format!("{} {}", quoted, column_type(field.sql_type));
                    if !field.nullable {
                        def.push_str(" NOT NULL");
                    }
                    if let Some(default) = field.default.as_ref().and_then(|d| literal(field.sql_type, d)) {
                        def.push_str(" DEFAULT ");
                        def.push_str(&default);
                    }
                    def
                }
                None => format!("{} TEXT", quoted),
            },
        };
        parts.push(def);
    }

    for key in class.unique_keys() {
        let cols: Vec<String> = key.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("UNIQUE ({})", cols.join(", ")));
    }

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quote_ident(table),
            parts.join(",\n  ")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("{}_owner_id_idx", table)),
            quote_ident(table),
            quote_ident("owner_id")
        ),
    ]
}

pub fn drop_table(class: &ClassInfo) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(class.table()))
}

/// Create tables for every registered class.
#[tracing::instrument(level = "debug", skip_all, fields(classes = registry.len()))]
pub fn create_tables(storage: &SqliteStorage, registry: &ClassRegistry) -> Result<()> {
    for class in registry.iter() {
        for statement in create_table(class) {
            storage.execute_raw(&statement)?;
        }
        tracing::debug!(class = %class.name(), table = %class.table(), "Created table");
    }
    Ok(())
}

/// Drop tables for every registered class.
pub fn drop_tables(storage: &SqliteStorage, registry: &ClassRegistry) -> Result<()> {
    for class in registry.iter() {
        storage.execute_raw(&drop_table(class))?;
    }
    Ok(())
}

impl SqliteStorage {
    /// Create tables for every registered class. Existing tables are kept.
    pub fn create_tables(&self, registry: &ClassRegistry) -> Result<()> {
        create_tables(self, registry)
    }

    pub fn drop_tables(&self, registry: &ClassRegistry) -> Result<()> {
        drop_tables(self, registry)
    }
}

/// SQL literal for a column default, when one can be written inline.
fn literal(sql_type: SqlType, value: &Value) -> Option<String> {
    match (sql_type, value) {
        (_, Value::Null) => Some("NULL".to_string()),
        (SqlType::Boolean, Value::Bool(b)) => Some(if *b { "1" } else { "0" }.to_string()),
        (SqlType::BigInt | SqlType::TimestampTz, Value::BigInt(i) | Value::TimestampTz(i)) => {
            Some(i.to_string())
        }
        (SqlType::Double, Value::Double(d)) if d.is_finite() => Some(d.to_string()),
        (SqlType::Double, Value::BigInt(i)) => Some(i.to_string()),
        (SqlType::Text, Value::Text(s)) => Some(format!("'{}'", s.replace('\'', "''"))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::{ClassDef, FieldInfo};

    fn registry() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry
            .register(
                ClassDef::new("Body")
                    .field(FieldInfo::new("text", SqlType::Text))
                    .field(FieldInfo::new("draft", SqlType::Boolean).default(false)),
            )
            .unwrap();
        registry
            .register(
                ClassDef::new("BlogPost")
                    .field(FieldInfo::new("title", SqlType::Text).default("It's new"))
                    .field(FieldInfo::new("views", SqlType::BigInt).nullable(true))
                    .field(FieldInfo::new("slug", SqlType::Text).unique(true))
                    .has_one("body", "Body"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_create_table() {
        let registry = registry();
        let post = registry.class("BlogPost").unwrap();
        let statements = create_table(&post);
        assert_eq!(statements.len(), 2);
        let table = &statements[0];
        assert!(table.starts_with("CREATE TABLE IF NOT EXISTS \"blog_post\""));
        assert!(table.contains("\"id\" TEXT NOT NULL PRIMARY KEY"));
        assert!(table.contains("\"created_at\" INTEGER NOT NULL"));
        assert!(table.contains("\"title\" TEXT NOT NULL DEFAULT 'It''s new'"));
        assert!(table.contains("\"views\" INTEGER,"));
        assert!(table.contains("\"body\" TEXT"));
        assert!(table.contains("UNIQUE (\"slug\")"));
        assert!(statements[1].contains("\"blog_post_owner_id_idx\""));
    }

    #[test]
    fn test_boolean_default() {
        let registry = registry();
        let body = registry.class("Body").unwrap();
        assert!(create_table(&body)[0].contains("\"draft\" INTEGER NOT NULL DEFAULT 0"));
    }

    #[test]
    fn test_create_and_drop_tables() {
        let registry = registry();
        let storage = SqliteStorage::open_memory().unwrap();
        storage.create_tables(&registry).unwrap();
        // idempotent
        create_tables(&storage, &registry).unwrap();
        storage
            .execute_raw("INSERT INTO \"body\" (\"id\", \"created_at\", \"text\") VALUES ('1', 0, 'x')")
            .unwrap();
        drop_tables(&storage, &registry).unwrap();
        assert!(storage.execute_raw("SELECT * FROM \"body\"").is_err());
    }
}
