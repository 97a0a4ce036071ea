/// Storefront Error Module
///
/// This module defines the error types for the storefront database layer.
/// Connection failures and query failures are classified separately so
/// callers can tell "the database is unreachable" apart from "this
/// statement is wrong". Both keep the driver's message and result code.
use rusqlite::types::Value;
use thiserror::Error;

/// Raised when a connection to the database cannot be established.
#[derive(Error, Debug)]
#[error("Connection error: {message} (dsn: {dsn}, code: {})", display_code(.code))]
pub struct ConnectionError {
    /// Connection string that was used for the attempt
    pub dsn: String,
    /// Driver error message
    pub message: String,
    /// Driver extended result code, when the driver reported one
    pub code: Option<i32>,
    #[source]
    source: Option<rusqlite::Error>,
}

impl ConnectionError {
    /// Wraps a driver error raised while connecting to `dsn`.
    pub fn from_driver(dsn: impl Into<String>, err: rusqlite::Error) -> Self {
        ConnectionError {
            dsn: dsn.into(),
            message: err.to_string(),
            code: driver_code(&err),
            source: Some(err),
        }
    }

    /// Builds an error that did not originate in the driver.
    pub fn new(dsn: impl Into<String>, message: impl Into<String>) -> Self {
        ConnectionError {
            dsn: dsn.into(),
            message: message.into(),
            code: None,
            source: None,
        }
    }
}

/// Raised when a statement fails to prepare, bind, or execute.
///
/// `Display` shows the SQL text but never the bound values; the values are
/// kept in `params` for callers that want them in diagnostics.
#[derive(Error, Debug)]
#[error("Query error: {message} (sql: {sql}, params: {}, code: {})", .params.len(), display_code(.code))]
pub struct QueryError {
    /// SQL text of the failed statement
    pub sql: String,
    /// Values that were bound to the statement
    pub params: Vec<Value>,
    /// Driver error message
    pub message: String,
    /// Driver extended result code, when the driver reported one
    pub code: Option<i32>,
    #[source]
    source: Option<rusqlite::Error>,
}

impl QueryError {
    /// Wraps a driver error raised while running `sql` with `params`.
    pub fn from_driver(sql: &str, params: &[Value], err: rusqlite::Error) -> Self {
        QueryError {
            sql: sql.to_string(),
            params: params.to_vec(),
            message: err.to_string(),
            code: driver_code(&err),
            source: Some(err),
        }
    }

    /// Builds an error that did not originate in the driver.
    pub fn new(sql: &str, params: &[Value], message: impl Into<String>) -> Self {
        QueryError {
            sql: sql.to_string(),
            params: params.to_vec(),
            message: message.into(),
            code: None,
            source: None,
        }
    }
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be reached or opened
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A statement or transaction command failed
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A result column is missing or holds an incompatible value
    #[error("Column error: {0}")]
    Column(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML configuration
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl StoreError {
    /// Returns true for connect-time failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// Returns true for statement or transaction failures.
    pub fn is_query(&self) -> bool {
        matches!(self, StoreError::Query(_))
    }

    /// Driver result code carried by the error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            StoreError::Connection(e) => e.code,
            StoreError::Query(e) => e.code,
            _ => None,
        }
    }
}

/// Type alias for Result to use StoreError as the error type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Extracts the extended SQLite result code from a driver error.
pub(crate) fn driver_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => Some(inner.extended_code),
        _ => None,
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none".to_string(),
    }
}
