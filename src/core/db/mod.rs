/// Database Module
///
/// The storefront's single-handle database layer, split into:
/// - **Connection Management** (`connection.rs`): handle lifecycle, liveness probing, transactions
/// - **Query Execution** (`query.rs`): parameterized statements and row shaping
/// - **Schema Introspection** (`schema.rs`): table lookup and row counting
///
/// All three extend `ConnectionManager`, so callers work with one type.
pub mod connection;
pub mod query;
pub mod schema;

pub use connection::{ConnectionInfo, ConnectionManager, ConnectionState};
pub use query::{Row, StatementResult};
