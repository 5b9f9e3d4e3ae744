//! In-process storage backend.
//!
//! Tables spring into existence on first insert. Rows are kept in insertion
//! order; `select` applies filters and ordering the way a SQL backend would.
//! Statement counters let tests assert how much a code path touched storage.

use crate::error::{Error, QueryErrorKind, Result};
use crate::row::{ColumnInfo, Row};
use crate::storage::{SelectQuery, Storage};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};

type MemRow = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// Number of statements of each kind a storage has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl StorageStats {
    pub fn total(&self) -> u64 {
        self.selects + self.inserts + self.updates + self.deletes
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<HashMap<String, Vec<MemRow>>>,
    selects: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            selects: self.selects.load(AtomicOrdering::Relaxed),
            inserts: self.inserts.load(AtomicOrdering::Relaxed),
            updates: self.updates.load(AtomicOrdering::Relaxed),
            deletes: self.deletes.load(AtomicOrdering::Relaxed),
        }
    }

    /// Number of rows currently held in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map_or(0, Vec::len)
    }

    /// Drop every table.
    pub fn clear(&self) {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn check_arity(fields: &[String], values: &[Value]) -> Result<()> {
    if fields.len() == values.len() {
        Ok(())
    } else {
        Err(Error::InvalidParameters(format!(
            "{} fields but {} values",
            fields.len(),
            values.len()
        )))
    }
}

impl Storage for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        self.selects.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(table = %query.table, criteria = ?query.criteria, "memory select");

        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get(&query.table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&MemRow> = rows
            .iter()
            .filter(|row| query.criteria.matches(|c| row.get(c)))
            .collect();

        if !query.order_by.is_empty() {
            matched.sort_by(|a, b| {
                for term in &query.order_by {
                    let left = a.get(&term.column).unwrap_or(&NULL);
                    let right = b.get(&term.column).unwrap_or(&NULL);
                    let ord = if term.descending {
                        right.sort_cmp(left)
                    } else {
                        left.sort_cmp(right)
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        let columns = Arc::new(ColumnInfo::new(query.columns.clone()));
        Ok(matched
            .into_iter()
            .map(|row| {
                let values = query
                    .columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or_default())
                    .collect();
                Row::with_columns(Arc::clone(&columns), values)
            })
            .collect())
    }

    fn insert(&self, table: &str, fields: &[String], values: &[Value]) -> Result<()> {
        check_arity(fields, values)?;
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(table, "memory insert");

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = tables.entry(table.to_string()).or_default();
        let row: MemRow = fields.iter().cloned().zip(values.iter().cloned()).collect();
        if let Some(id) = row.get("id") {
            if rows.iter().any(|r| r.get("id") == Some(id)) {
                return Err(Error::query(
                    QueryErrorKind::Constraint,
                    format!("UNIQUE constraint failed: {}.id", table),
                ));
            }
        }
        rows.push(row);
        Ok(())
    }

    fn update(
        &self,
        table: &str,
        id_field: &str,
        id: &Value,
        fields: &[String],
        values: &[Value],
    ) -> Result<u64> {
        check_arity(fields, values)?;
        self.updates.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(table, "memory update");

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in rows.iter_mut().filter(|r| r.get(id_field) == Some(id)) {
            for (field, value) in fields.iter().zip(values) {
                row.insert(field.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    fn delete(&self, table: &str, id_field: &str, id: &Value) -> Result<u64> {
        self.deletes.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(table, "memory delete");

        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| r.get(id_field) != Some(id));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{Criteria, OrderBy};

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        for (id, name, rank) in [("a", "Ann", 2), ("b", "Bob", 1), ("c", "Cid", 3)] {
            storage
                .insert(
                    "hero",
                    &cols(&["id", "name", "rank"]),
                    &[id.into(), name.into(), rank.into()],
                )
                .unwrap();
        }
        storage
    }

    #[test]
    fn select_filters_orders_and_projects() {
        let storage = seeded();
        let query = SelectQuery::new("hero", cols(&["name", "missing"]))
            .order_by(vec![OrderBy::desc("rank")]);
        let rows = storage.select(&query).unwrap();
        let names: Vec<&str> = rows
            .iter()
            .map(|r| r.get_by_name("name").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(names, vec!["Cid", "Ann", "Bob"]);
        assert_eq!(rows[0].get_by_name("missing"), Some(&Value::Null));

        let query =
            SelectQuery::new("hero", cols(&["id"])).filter(Criteria::new().eq("name", "Bob"));
        assert_eq!(storage.select(&query).unwrap().len(), 1);
    }

    #[test]
    fn missing_table_selects_nothing() {
        let storage = MemoryStorage::new();
        let rows = storage
            .select(&SelectQuery::new("nowhere", cols(&["id"])))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn duplicate_id_is_a_constraint_error() {
        let storage = seeded();
        let err = storage
            .insert("hero", &cols(&["id"]), &["a".into()])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query(ref q) if q.kind == QueryErrorKind::Constraint
        ));
    }

    #[test]
    fn update_delete_and_counters() {
        let storage = seeded();
        let n = storage
            .update("hero", "id", &"b".into(), &cols(&["rank"]), &[9.into()])
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(storage.delete("hero", "id", &"a".into()).unwrap(), 1);
        assert_eq!(storage.delete("hero", "id", &"a".into()).unwrap(), 0);
        assert_eq!(storage.row_count("hero"), 2);

        let stats = storage.stats();
        assert_eq!(stats.inserts, 3);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.deletes, 2);
        assert_eq!(stats.total(), 6);
    }

    #[test]
    fn raw_sql_is_unsupported() {
        let storage = MemoryStorage::new();
        let err = storage.prepare_and_execute("SELECT 1", &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Query(ref q) if q.kind == QueryErrorKind::Unsupported
        ));
    }
}
