//! Configuration and database connection layer for a storefront backend.

// Core infrastructure modules
pub mod core;

pub mod config;
pub mod logging;

#[cfg(test)]
mod test_utils;

pub use crate::config::{load_config, resolve_config, AppConfig, DatabaseConfig};
pub use crate::core::db::{ConnectionInfo, ConnectionManager, ConnectionState, Row, StatementResult};
pub use crate::core::{ConnectionError, QueryError, Result, StoreError};
pub use rusqlite::types::Value;
