/// Core Module
///
/// Error types and the database layer shared by the rest of the crate.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{ConnectionError, QueryError, Result, StoreError};
