/// # Test Utilities Module
///
/// Fixtures for unit tests: every fixture gets its own temporary directory
/// and database file, so tests never share a handle.

use crate::config::DatabaseConfig;
use crate::core::db::ConnectionManager;
use tempfile::TempDir;

const PRODUCTS_SCHEMA: &str = "
    CREATE TABLE products (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        price REAL NOT NULL,
        status TEXT NOT NULL DEFAULT 'active'
    );
    INSERT INTO products (name, price, status) VALUES ('Mug', 12.0, 'active');
    INSERT INTO products (name, price, status) VALUES ('Poster', 24.5, 'active');
    INSERT INTO products (name, price, status) VALUES ('Lamp', 40.0, 'inactive');
";

/// Isolated database test fixture
pub struct TestDatabase {
    pub manager: ConnectionManager,
    // Declared last so the directory is removed after the handle closes
    _dir: TempDir,
}

impl TestDatabase {
    /// Empty database in a fresh temporary directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let manager = ConnectionManager::new(DatabaseConfig::in_dir(dir.path(), "test"))
            .expect("failed to open test database");
        TestDatabase { manager, _dir: dir }
    }

    /// Database with a small `products` table.
    pub fn with_products() -> Self {
        let db = TestDatabase::new();
        db.manager
            .with_connection(|conn| {
                conn.execute_batch(PRODUCTS_SCHEMA)
                    .expect("failed to create products table");
                Ok(())
            })
            .expect("failed to seed products");
        db
    }
}
