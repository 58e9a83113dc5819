//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite database layer featuring:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - Versioned schema stamped into `user_version`
//! - WAL mode so workers appending progress don't block readers following a job

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::constants::network;
use crate::types::{ChaplinError, Result, ResultExt};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Schema version stamped into `PRAGMA user_version`
const SCHEMA_VERSION: u32 = 1;

/// Connection pool configuration
///
/// Pool size is dynamically calculated based on CPU cores.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 4;
    const MAX_POOL_SIZE: u32 = 16;

    /// clamp(cores * 2, MIN, MAX)
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);

        (cores * 2).clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }

    /// Create config with automatic pool sizing based on CPU cores
    pub fn auto() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(1),
            connection_timeout_secs: network::CONNECTION_TIMEOUT_SECS,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    ///
    /// Missing parent directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| {
                ChaplinError::Storage(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    ///
    /// Single connection, so every caller sees the same database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| {
            ChaplinError::Storage(format!("Failed to create in-memory pool: {}", e))
        })?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            ChaplinError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema.
    ///
    /// Safe to call on every open. A database stamped by a newer build is
    /// refused rather than written to.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;

        let existing: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")?;
        if existing > SCHEMA_VERSION {
            return Err(ChaplinError::Storage(format!(
                "Database schema version {} is newer than supported version {}",
                existing, SCHEMA_VERSION
            )));
        }

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        if existing < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
            tracing::debug!(version = SCHEMA_VERSION, "Database schema initialized");
        }

        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a single SQL statement.
    pub fn execute(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(sql, params).with_context("Failed to execute SQL")
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// All operations within the closure are atomic. If the closure panics,
    /// the transaction is rolled back and an error is returned instead of
    /// poisoning the connection pool.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + std::panic::UnwindSafe,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(ChaplinError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }
}
