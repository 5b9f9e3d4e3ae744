//! The storage collaborator the engine writes rows through.

use crate::criteria::{Criteria, OrderBy};
use crate::error::{Error, QueryErrorKind, Result};
use crate::row::Row;
use crate::value::Value;

/// A single-table read.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub criteria: Criteria,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            criteria: Criteria::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Row-level access to a backing store.
///
/// Calls are blocking. Rows returned by [`Storage::select`] carry exactly the
/// requested columns in the requested order.
pub trait Storage: Send + Sync {
    /// Short backend name used in diagnostics.
    fn backend_name(&self) -> &'static str;

    fn select(&self, query: &SelectQuery) -> Result<Vec<Row>>;

    fn insert(&self, table: &str, fields: &[String], values: &[Value]) -> Result<()>;

    /// Update the row whose `id_field` equals `id`. Returns rows affected.
    fn update(
        &self,
        table: &str,
        id_field: &str,
        id: &Value,
        fields: &[String],
        values: &[Value],
    ) -> Result<u64>;

    /// Delete the row whose `id_field` equals `id`. Returns rows affected.
    fn delete(&self, table: &str, id_field: &str, id: &Value) -> Result<u64>;

    /// Run raw parametrized SQL.
    fn prepare_and_execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let _ = params;
        Err(Error::query(
            QueryErrorKind::Unsupported,
            format!("{} storage cannot execute SQL: {}", self.backend_name(), sql),
        ))
    }
}
