//! Shared fixtures for integration tests.

#![allow(dead_code)]

use storefront_db::{ConnectionManager, DatabaseConfig, Value};
use tempfile::TempDir;

pub const ORDERS_SCHEMA: &str = "
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer TEXT NOT NULL,
        total REAL NOT NULL,
        status TEXT NOT NULL
    )";

/// A manager backed by a database file in its own temporary directory.
pub struct Fixture {
    pub manager: ConnectionManager,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut DatabaseConfig)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = DatabaseConfig::in_dir(dir.path(), "shop");
        adjust(&mut config);
        let manager = ConnectionManager::new(config).expect("failed to open database");
        manager
            .execute(ORDERS_SCHEMA, &[])
            .expect("failed to create orders table");
        Fixture { manager, dir }
    }

    pub fn add_order(&self, customer: &str, total: f64, status: &str) -> i64 {
        self.manager
            .insert(
                "INSERT INTO orders (customer, total, status) VALUES (?, ?, ?)",
                &[text(customer), Value::Real(total), text(status)],
            )
            .expect("failed to insert order")
    }
}

pub fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}
