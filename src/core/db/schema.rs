/// Schema Introspection Module
///
/// Table lookup and row counting. Each helper comes in two forms: a
/// `try_` form that reports failures like every other operation, and a
/// best-effort form that logs the failure and falls back to `false` / `0`.

use super::connection::ConnectionManager;
use crate::core::{QueryError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use tracing::{debug, error, warn};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

const TABLE_LOOKUP_SQL: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?";

impl ConnectionManager {
    /// Whether a table matching `name` exists.
    ///
    /// `name` is a `LIKE` pattern, so `_` and `%` act as wildcards.
    pub fn try_table_exists(&self, name: &str) -> Result<bool> {
        let found = self
            .fetch_one(TABLE_LOOKUP_SQL, &[Value::Text(name.to_string())])?
            .is_some();
        debug!(table = name, found, "table lookup");
        Ok(found)
    }

    /// Best-effort form of [`try_table_exists`](Self::try_table_exists):
    /// any failure is logged and reported as `false`.
    pub fn table_exists(&self, name: &str) -> bool {
        self.try_table_exists(name).unwrap_or_else(|e| {
            warn!(table = name, error = %e, "table lookup failed, reporting table as missing");
            false
        })
    }

    /// Counts rows of `table`, optionally filtered by `where_clause`.
    ///
    /// The clause is inserted verbatim; only `params` are bound. `table`
    /// must be a plain identifier.
    pub fn try_row_count(&self, table: &str, where_clause: &str, params: &[Value]) -> Result<i64> {
        let sql = count_sql(table, where_clause);
        if !IDENTIFIER.is_match(table) {
            error!(table, sql = %sql, "invalid table name for row count");
            return Err(QueryError::new(&sql, params, format!("invalid table name '{}'", table)).into());
        }

        let count = match self.fetch_one(&sql, params)? {
            Some(row) => row.get_as::<i64>("row_count")?,
            None => 0,
        };
        debug!(table, count, "row count");
        Ok(count)
    }

    /// Best-effort form of [`try_row_count`](Self::try_row_count):
    /// any failure is logged and reported as `0`.
    pub fn row_count(&self, table: &str, where_clause: &str, params: &[Value]) -> i64 {
        self.try_row_count(table, where_clause, params).unwrap_or_else(|e| {
            warn!(table, error = %e, "row count failed, reporting zero rows");
            0
        })
    }
}

fn count_sql(table: &str, where_clause: &str) -> String {
    let mut sql = format!("SELECT COUNT(*) AS row_count FROM \"{}\"", table);
    let clause = where_clause.trim();
    if !clause.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    sql
}
