//! Parametrized statement text for SQL backends.
//!
//! Every builder returns `(sql, params)` with numbered `?N` placeholders.
//! Identifiers are always quoted.

use crate::identifiers::quote_ident;
use crate::storage::SelectQuery;
use crate::value::Value;

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn select(query: &SelectQuery) -> (String, Vec<Value>) {
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(&query.columns),
        quote_ident(&query.table)
    );
    let mut params = Vec::new();

    if !query.criteria.is_empty() {
        let clauses: Vec<String> = query
            .criteria
            .filters()
            .iter()
            .map(|(column, value)| {
                if value.is_null() {
                    format!("{} IS NULL", quote_ident(column))
                } else {
                    params.push(value.clone());
                    format!("{} = ?{}", quote_ident(column), params.len())
                }
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !query.order_by.is_empty() {
        let terms: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                format!(
                    "{} {}",
                    quote_ident(&o.column),
                    if o.descending { "DESC" } else { "ASC" }
                )
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    (sql, params)
}

pub fn insert(table: &str, fields: &[String], values: &[Value]) -> (String, Vec<Value>) {
    let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list(fields),
        placeholders.join(", ")
    );
    (sql, values.to_vec())
}

pub fn update(
    table: &str,
    id_field: &str,
    id: &Value,
    fields: &[String],
    values: &[Value],
) -> (String, Vec<Value>) {
    let sets: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", quote_ident(f), i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_ident(table),
        sets.join(", "),
        quote_ident(id_field),
        fields.len() + 1
    );
    let mut params = values.to_vec();
    params.push(id.clone());
    (sql, params)
}

pub fn delete(table: &str, id_field: &str, id: &Value) -> (String, Vec<Value>) {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(id_field)
    );
    (sql, vec![id.clone()])
}
