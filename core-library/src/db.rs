//! # Library Database
//!
//! One SQLite file holds the catalog tables and the job queue. SQLite allows a
//! single writer, so the pool is small and every connection waits on the
//! write lock for [`DatabaseConfig::busy_timeout`] before a statement fails
//! with `SQLITE_BUSY` (surfaced as [`LibraryError::Busy`]).
//!
//! Connections are opened with:
//! - WAL journaling, so readers are not blocked by the writer
//! - foreign keys on
//! - `synchronous = NORMAL`
//!
//! Embedded migrations from `migrations/` run before the pool is returned.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("library.db")).await?;
//! let scratch = create_pool(DatabaseConfig::in_memory()).await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the library lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// Private to the pool. Gone when the pool closes.
    Memory,
}

/// Pool settings for the library database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Wait for a free connection before giving up
    pub acquire_timeout: Duration,
    /// Wait for the write lock before failing with `SQLITE_BUSY`
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// File-backed database, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            min_connections: 1,
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// In-memory database.
    ///
    /// Each connection to `:memory:` sees its own empty database, so the pool
    /// is pinned to a single connection.
    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::Memory,
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// File-backed when a path is given, in-memory otherwise.
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::new(path),
            None => Self::in_memory(),
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Ignored for in-memory databases.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.location {
            DatabaseLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            DatabaseLocation::Memory => SqliteConnectOptions::new().in_memory(true),
        };

        options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new().acquire_timeout(self.acquire_timeout);
        match self.location {
            DatabaseLocation::File(_) => options
                .min_connections(self.min_connections)
                .max_connections(self.max_connections.max(1)),
            // Dropping the last connection would drop the database with it.
            DatabaseLocation::Memory => options
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open the pool, apply migrations and check a connection responds.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        location = ?config.location,
        max_connections = config.max_connections,
        busy_timeout_ms = config.busy_timeout.as_millis() as u64,
        "Opening library database"
    );

    let pool = config
        .pool_options()
        .connect_with(config.connect_options())
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open library database");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;

    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await
        .map_err(LibraryError::from)?;
    debug!(connections = pool.size(), "Library database ready");

    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;

    debug!("Migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        let file = DatabaseConfig::from_path(Some(Path::new("library.db")));
        assert_eq!(
            file.location,
            DatabaseLocation::File(PathBuf::from("library.db"))
        );

        let memory = DatabaseConfig::from_path(None);
        assert_eq!(memory.location, DatabaseLocation::Memory);
        assert_eq!(memory.max_connections, 1);
    }

    #[test]
    fn test_memory_pool_is_pinned_to_one_connection() {
        let options = DatabaseConfig::in_memory().max_connections(8).pool_options();
        assert_eq!(options.get_max_connections(), 1);
        assert_eq!(options.get_idle_timeout(), None);
    }

    #[core_async::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0, 1);
    }

    #[core_async::test]
    async fn test_migrations_create_catalog_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in ["artists", "albums", "tracks"] {
            let result: (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();

            assert_eq!(result.0, 1, "{} table should exist", table);
        }
    }

    #[core_async::test]
    async fn test_file_database_uses_wal() {
        let path = std::env::temp_dir().join(format!("library-wal-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(DatabaseConfig::new(&path)).await.unwrap();

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
