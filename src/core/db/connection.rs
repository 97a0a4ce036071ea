/// Connection Management Module
///
/// This module owns the single database handle used by the storefront:
/// lazy connection, liveness probing with one reconnect attempt, explicit
/// teardown, and transaction passthrough.
///
/// The handle moves through `Absent -> Live`, back through a reconnect when
/// a probe fails, and to `Failed` when the driver refuses a connection.
/// Every access goes through one mutex, so callers on different threads
/// never share the handle concurrently.

use crate::config::DatabaseConfig;
use crate::core::{ConnectionError, QueryError, Result, StoreError};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Deserializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Process-wide manager handed out by `ConnectionManager::instance`.
static INSTANCE: OnceCell<ConnectionManager> = OnceCell::new();

/// Lifecycle state of the managed handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or explicitly torn down
    Absent,
    /// A handle is open and passed its last check
    Live,
    /// The last connection attempt failed
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Absent
    }
}

/// Metadata about the currently open handle
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    /// Identifier assigned on connect; changes on every reconnect
    pub id: Uuid,
    /// Connection string the handle was opened with
    pub dsn: String,
    pub connected_at: DateTime<Utc>,
}

/// Internal database state structure
#[derive(Debug, Default)]
struct DbState {
    connection: Option<Connection>,
    info: Option<ConnectionInfo>,
    state: ConnectionState,
}

/// Owns exactly one database handle and serializes all access to it.
///
/// The manager is neither `Clone` nor deserializable; share it by reference.
#[derive(Debug)]
pub struct ConnectionManager {
    config: DatabaseConfig,
    state: Mutex<DbState>,
    reconnects: AtomicU64,
}

impl ConnectionManager {
    /// Creates a manager and connects immediately.
    ///
    /// # Errors
    ///
    /// `StoreError::Config` if the configuration is invalid,
    /// `StoreError::Connection` if the database cannot be opened.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let manager = ConnectionManager::lazy(config)?;
        manager.connect()?;
        Ok(manager)
    }

    /// Creates a manager that connects on first use.
    pub fn lazy(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(ConnectionManager {
            config,
            state: Mutex::new(DbState::default()),
            reconnects: AtomicU64::new(0),
        })
    }

    /// Returns the process-wide manager, creating it on first call.
    ///
    /// The configuration is built from defaults and the `DB_*` environment
    /// variables. If the first connection attempt fails nothing is stored,
    /// so a later call tries again.
    pub fn instance() -> Result<&'static ConnectionManager> {
        INSTANCE.get_or_try_init(|| {
            let mut config = DatabaseConfig::default();
            config.apply_env_overrides()?;
            ConnectionManager::new(config)
        })
    }

    /// Installs the process-wide manager with an explicit configuration.
    ///
    /// If a manager is already installed it is returned unchanged.
    pub fn install(config: DatabaseConfig) -> Result<&'static ConnectionManager> {
        let installed = INSTANCE.get_or_try_init(|| ConnectionManager::new(config.clone()))?;
        if installed.config != config {
            warn!(
                dsn = %installed.config.dsn(),
                ignored_dsn = %config.dsn(),
                "database manager already installed, ignoring new configuration"
            );
        }
        Ok(installed)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Opens a fresh handle, replacing any existing one.
    pub fn connect(&self) -> Result<()> {
        let mut state = self.lock();
        self.connect_locked(&mut state)
    }

    /// Closes the handle. The next operation reconnects.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        if let Some(info) = state.info.take() {
            info!(connection_id = %info.id, "closing database connection");
        }
        state.connection = None;
        state.state = ConnectionState::Absent;
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.lock().info.clone()
    }

    /// Number of reconnects triggered by failed liveness probes.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Whether the current handle has an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.lock()
            .connection
            .as_ref()
            .map(|conn| !conn.is_autocommit())
            .unwrap_or(false)
    }

    /// Starts a transaction on a live handle.
    pub fn begin_transaction(&self) -> Result<()> {
        info!("starting transaction");
        self.with_connection(|conn| run_control(conn, "BEGIN"))
    }

    /// Commits the open transaction.
    ///
    /// This never probes or reconnects: a fresh handle would silently drop
    /// the transaction being committed.
    pub fn commit(&self) -> Result<()> {
        info!("committing transaction");
        self.with_current_connection("COMMIT", |conn| run_control(conn, "COMMIT"))
    }

    /// Rolls back the open transaction.
    pub fn rollback(&self) -> Result<()> {
        info!("rolling back transaction");
        self.with_current_connection("ROLLBACK", |conn| run_control(conn, "ROLLBACK"))
    }

    /// Runs `f` against a live handle, connecting or reconnecting first.
    ///
    /// The lock is held for the whole call, so everything `f` does (for
    /// example reading the last insert id) sees the same handle. Other
    /// callers block until `f` returns.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        self.ensure_live(&mut state)?;
        match state.connection.as_ref() {
            Some(conn) => f(conn),
            None => Err(ConnectionError::new(self.config.dsn(), "no database connection").into()),
        }
    }

    /// Runs `f` against the current handle without probing it.
    fn with_current_connection<T>(
        &self,
        sql: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let state = self.lock();
        match state.connection.as_ref() {
            Some(conn) => f(conn),
            None => {
                error!(sql, "no open database connection");
                Err(QueryError::new(sql, &[], "no open database connection").into())
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, DbState> {
        // A panic while holding the lock leaves at worst a dead handle,
        // which the next probe replaces.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns with a live handle in `state`, reconnecting at most once.
    ///
    /// If the dead handle had an open transaction, the new handle is kept
    /// but the call fails: the transaction's writes are gone and running
    /// further statements would commit them outside of it.
    fn ensure_live(&self, state: &mut DbState) -> Result<()> {
        let probe = state
            .connection
            .as_ref()
            .map(|conn| (probe(conn, &self.config.probe_sql), conn.is_autocommit()));

        match probe {
            None => self.connect_locked(state),
            Some((Ok(()), _)) => Ok(()),
            Some((Err(err), autocommit)) => {
                warn!(
                    error = %err,
                    in_transaction = !autocommit,
                    "database liveness probe failed, reconnecting"
                );
                state.connection = None;
                state.info = None;
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                self.connect_locked(state)?;
                if autocommit {
                    Ok(())
                } else {
                    error!("open transaction discarded by reconnect");
                    Err(ConnectionError::new(
                        self.config.dsn(),
                        "connection lost during an open transaction; the transaction was rolled back",
                    )
                    .into())
                }
            }
        }
    }

    fn connect_locked(&self, state: &mut DbState) -> Result<()> {
        let dsn = self.config.dsn();
        info!(dsn = %dsn, "connecting to database");

        match self.open(&dsn) {
            Ok(conn) => {
                let info = ConnectionInfo {
                    id: Uuid::new_v4(),
                    dsn,
                    connected_at: Utc::now(),
                };
                info!(dsn = %info.dsn, connection_id = %info.id, "database connection established");
                state.connection = Some(conn);
                state.info = Some(info);
                state.state = ConnectionState::Live;
                Ok(())
            }
            Err(err) => {
                error!(dsn = %err.dsn, code = ?err.code, error = %err.message, "database connection failed");
                state.connection = None;
                state.info = None;
                state.state = ConnectionState::Failed;
                Err(StoreError::Connection(err))
            }
        }
    }

    /// Opens and configures a handle for `dsn`.
    fn open(&self, dsn: &str) -> std::result::Result<Connection, ConnectionError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(dsn, flags)
            .map_err(|e| ConnectionError::from_driver(dsn, e))?;

        let encoding = self
            .config
            .encoding()
            .map_err(|e| ConnectionError::new(dsn, e.to_string()))?;

        // Encoding only takes effect on a database that has no content yet.
        conn.execute_batch(&format!(
            "PRAGMA encoding = '{}';
             PRAGMA foreign_keys = ON;",
            encoding
        ))
        .map_err(|e| ConnectionError::from_driver(dsn, e))?;

        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))
            .map_err(|e| ConnectionError::from_driver(dsn, e))?;

        // In-memory databases report "memory" instead of "wal".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| ConnectionError::from_driver(dsn, e))?;
        if journal_mode != "wal" && journal_mode != "memory" {
            return Err(ConnectionError::new(
                dsn,
                format!("failed to set WAL journal mode, got: {}", journal_mode),
            ));
        }

        debug!(dsn, encoding, journal_mode = %journal_mode, "connection configured");
        Ok(conn)
    }
}

impl<'de> Deserialize<'de> for ConnectionManager {
    fn deserialize<D>(_deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Err(serde::de::Error::custom(
            "ConnectionManager cannot be deserialized; construct it with ConnectionManager::new or use ConnectionManager::instance",
        ))
    }
}

/// Steps the probe statement once; any driver error means the handle is unusable.
fn probe(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    rows.next()?;
    Ok(())
}

fn run_control(conn: &Connection, sql: &str) -> Result<()> {
    conn.execute_batch(sql).map_err(|e| {
        error!(sql, error = %e, "transaction command failed");
        StoreError::Query(QueryError::from_driver(sql, &[], e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestDatabase;

    #[test]
    fn test_new_connects_eagerly() {
        let db = TestDatabase::new();
        assert_eq!(db.manager.state(), ConnectionState::Live);

        let info = db.manager.info().unwrap();
        assert_eq!(info.dsn, db.manager.config().dsn());
        assert_eq!(db.manager.reconnects(), 0);
    }

    #[test]
    fn test_lazy_connects_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::lazy(DatabaseConfig::in_dir(dir.path(), "shop")).unwrap();
        assert_eq!(manager.state(), ConnectionState::Absent);
        assert!(manager.info().is_none());

        let one: i64 = manager
            .with_connection(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap()))
            .unwrap_or_else(|e| panic!("query failed: {e}"));
        assert_eq!(one, 1);
        assert!(manager.is_connected());
        assert_eq!(manager.reconnects(), 0);
    }

    #[test]
    fn test_connection_pragmas() {
        let db = TestDatabase::new();
        db.manager
            .with_connection(|conn| {
                let fk: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
                assert_eq!(fk, 1);

                let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
                assert_eq!(mode, "wal");

                let timeout: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0)).unwrap();
                assert_eq!(timeout, 5_000);

                let encoding: String = conn.query_row("PRAGMA encoding", [], |row| row.get(0)).unwrap();
                assert_eq!(encoding, "UTF-8");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_connect_failure_is_classified() {
        let config = DatabaseConfig::in_dir("/nonexistent/storefront/dir", "shop");
        let err = ConnectionManager::new(config.clone()).unwrap_err();
        match err {
            StoreError::Connection(e) => {
                assert_eq!(e.dsn, config.dsn());
                assert!(e.code.is_some());
            }
            other => panic!("Expected Connection error, got {other:?}"),
        }

        let manager = ConnectionManager::lazy(config).unwrap();
        assert!(manager.connect().is_err());
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = DatabaseConfig::in_memory();
        config.charset = "latin1".to_string();
        assert!(matches!(ConnectionManager::lazy(config), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_failed_probe_reconnects_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DatabaseConfig::in_dir(dir.path(), "shop");
        config.probe_sql = "SELECT 1 FROM probe_marker".to_string();
        let manager = ConnectionManager::new(config).unwrap();
        let first_id = manager.info().unwrap().id;

        // The probe table does not exist, so the probe fails and the
        // manager opens a new handle before running the closure.
        manager.with_connection(|_| Ok(())).unwrap();
        assert_eq!(manager.reconnects(), 1);
        assert!(manager.is_connected());
        assert_ne!(manager.info().unwrap().id, first_id);
    }

    #[test]
    fn test_reconnect_inside_transaction_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DatabaseConfig::in_dir(dir.path(), "shop");
        config.probe_sql = "SELECT 1 FROM probe_marker".to_string();
        let manager = ConnectionManager::new(config).unwrap();
        manager
            .with_connection(|conn| Ok(conn.execute_batch("CREATE TABLE probe_marker (id INTEGER)").unwrap()))
            .unwrap();

        manager.begin_transaction().unwrap();
        manager
            .with_connection(|conn| Ok(conn.execute_batch("DROP TABLE probe_marker").unwrap()))
            .unwrap();

        let mut ran = false;
        let err = manager
            .with_connection(|_| {
                ran = true;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_connection());
        assert!(!ran);
        assert!(manager.is_connected());
        assert!(!manager.in_transaction());
    }

    #[test]
    fn test_disconnect_then_reuse() {
        let db = TestDatabase::new();
        db.manager.disconnect();
        assert_eq!(db.manager.state(), ConnectionState::Absent);
        assert!(!db.manager.in_transaction());

        db.manager.with_connection(|_| Ok(())).unwrap();
        assert!(db.manager.is_connected());
        // Reconnecting after an explicit teardown is not a probe failure
        assert_eq!(db.manager.reconnects(), 0);
    }

    #[test]
    fn test_commit_without_connection_fails() {
        let manager = ConnectionManager::lazy(DatabaseConfig::in_memory()).unwrap();
        match manager.commit().unwrap_err() {
            StoreError::Query(e) => assert_eq!(e.sql, "COMMIT"),
            other => panic!("Expected Query error, got {other:?}"),
        }
    }

    #[test]
    fn test_transaction_state_tracking() {
        let db = TestDatabase::new();
        assert!(!db.manager.in_transaction());

        db.manager.begin_transaction().unwrap();
        assert!(db.manager.in_transaction());

        // Nested transactions are not supported
        assert!(db.manager.begin_transaction().is_err());

        db.manager.rollback().unwrap();
        assert!(!db.manager.in_transaction());

        // Nothing left to commit
        assert!(db.manager.commit().is_err());
    }

    #[test]
    fn test_deserialization_is_rejected() {
        let result = serde_json::from_str::<ConnectionManager>("{}");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("cannot be deserialized"));
    }
}
