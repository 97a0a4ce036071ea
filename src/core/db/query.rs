/// Query Execution Module
///
/// Parameterized statement execution and result shaping. Rows come back as
/// ordered, name-keyed mappings; writes come back as affected-row counts.

use super::connection::ConnectionManager;
use crate::core::{QueryError, Result, StoreError};
use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A single result row, keyed by column name in select-list order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Row { columns, values }
    }

    /// Value of the first column named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| &self.values[i])
    }

    /// Converts the value of column `name` into `T`.
    ///
    /// # Errors
    ///
    /// `StoreError::Column` if there is no such column or the value cannot
    /// be converted.
    pub fn get_as<T: FromSql>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| StoreError::Column(format!("no column named '{}'", name)))?;
        T::column_result(ValueRef::from(value))
            .map_err(|e| StoreError::Column(format!("column '{}': {}", name, e)))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Renders the row as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(name, value)| (name.to_string(), value_to_json(value)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Outcome of an executed statement
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// Rows changed by a statement that returns no columns
    Affected(usize),
    /// Rows produced by a statement that returns columns
    Rows(Vec<Row>),
}

impl StatementResult {
    /// Affected rows for writes, returned rows for reads.
    pub fn affected_rows(&self) -> usize {
        match self {
            StatementResult::Affected(n) => *n,
            StatementResult::Rows(rows) => rows.len(),
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            StatementResult::Affected(_) => Vec::new(),
            StatementResult::Rows(rows) => rows,
        }
    }
}

impl ConnectionManager {
    /// Prepares `sql`, binds `params` positionally, and runs it.
    ///
    /// # Errors
    ///
    /// `StoreError::Connection` if no live handle can be obtained,
    /// `StoreError::Query` if the statement fails to prepare, bind, or run.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.log_statement(sql, params);
        let result = self.with_connection(|conn| run_statement(conn, sql, params))?;
        debug!(sql, affected_rows = result.affected_rows(), "query executed");
        Ok(result)
    }

    /// Runs an INSERT and returns the row id it generated.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.log_statement(sql, params);
        let id = self.with_connection(|conn| {
            run_statement(conn, sql, params)?;
            Ok(conn.last_insert_rowid())
        })?;
        info!(id, "row inserted");
        Ok(id)
    }

    /// Runs an UPDATE and returns the number of changed rows.
    pub fn update(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let affected = self.execute(sql, params)?.affected_rows();
        info!(affected_rows = affected, "rows updated");
        Ok(affected)
    }

    /// Runs a DELETE and returns the number of removed rows.
    pub fn delete(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let affected = self.execute(sql, params)?.affected_rows();
        info!(affected_rows = affected, "rows deleted");
        Ok(affected)
    }

    /// First row of the result, or `None` when nothing matched.
    pub fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let row = self.execute(sql, params)?.into_rows().into_iter().next();
        debug!(found = row.is_some(), "fetched single row");
        Ok(row)
    }

    /// All rows of the result.
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rows = self.execute(sql, params)?.into_rows();
        debug!(row_count = rows.len(), "fetched rows");
        Ok(rows)
    }

    fn log_statement(&self, sql: &str, params: &[Value]) {
        if self.config().log_params {
            debug!(sql, params = ?params, "executing query");
        } else {
            debug!(sql, param_count = params.len(), "executing query");
        }
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| query_failed(sql, params, e))?;

    let expected = stmt.parameter_count();
    if expected != params.len() {
        let message = format!("expected {} parameters, got {}", expected, params.len());
        error!(sql, error = %message, "query failed");
        return Err(QueryError::new(sql, params, message).into());
    }

    if stmt.column_count() == 0 {
        // changes() keeps the count of the last INSERT/UPDATE/DELETE, so a
        // statement that changed nothing is detected via total_changes().
        let before = total_changes(conn).map_err(|e| query_failed(sql, params, e))?;
        let affected = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(|e| query_failed(sql, params, e))?;
        let after = total_changes(conn).map_err(|e| query_failed(sql, params, e))?;
        let affected = if after == before { 0 } else { affected };
        return Ok(StatementResult::Affected(affected));
    }

    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| query_failed(sql, params, e))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| query_failed(sql, params, e))? {
        let values = (0..columns.len())
            .map(|i| row.get::<_, Value>(i))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| query_failed(sql, params, e))?;
        out.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(StatementResult::Rows(out))
}

fn total_changes(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT total_changes()", [], |row| row.get(0))
}

fn query_failed(sql: &str, params: &[Value], err: rusqlite::Error) -> StoreError {
    let err = QueryError::from_driver(sql, params, err);
    error!(sql, code = ?err.code, error = %err.message, "query failed");
    StoreError::Query(err)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(t) => serde_json::Value::String(t.clone()),
        Value::Blob(b) => serde_json::Value::String(format!("<BLOB: {} bytes>", b.len())),
    }
}
