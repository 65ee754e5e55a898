//! Embedded SQLite storage bootstrap
//!
//! This module provides a clean separation between functional core (pure
//! configuration logic) and imperative shell (file system operations,
//! SQLite connections) for the disk-backed store.

use nutype::nutype;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{FlockError, Result};

#[nutype(
    sanitize(with = |path: PathBuf| path),
    validate(predicate = |path| !path.as_os_str().is_empty() && path.extension().is_some_and(|ext| ext == "db")),
    derive(Clone, Debug, Eq, PartialEq)
)]
pub struct DatabasePath(PathBuf);

impl DatabasePath {
    /// Create a new database path with validation
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or lacks the `.db` extension
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Self::try_new(path_buf).map_err(|_| {
            FlockError::validation(
                "database_path",
                "path is empty or has invalid extension (must be .db)",
            )
        })
    }

    /// Get the path as `PathBuf`
    pub fn as_path(&self) -> PathBuf {
        self.clone().into_inner()
    }

    /// Get the parent directory for file creation
    pub fn parent_directory(&self) -> Option<PathBuf> {
        self.as_path().parent().map(Path::to_path_buf)
    }
}

impl std::fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}

/// Database configuration with journaling settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    path: DatabasePath,
    enable_wal_mode: bool,
    enable_foreign_keys: bool,
}

impl DatabaseConfig {
    /// Create new database config with default settings (WAL on)
    pub fn new(path: DatabasePath) -> Self {
        Self {
            path,
            enable_wal_mode: true,
            enable_foreign_keys: true,
        }
    }

    /// Create config for testing with minimal settings
    pub fn for_testing(path: DatabasePath) -> Self {
        Self {
            path,
            enable_wal_mode: false,
            enable_foreign_keys: false,
        }
    }

    /// Get the database path
    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// Check if WAL mode is enabled
    pub fn wal_mode_enabled(&self) -> bool {
        self.enable_wal_mode
    }
}

/// Database connection with managed pool
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

// Functional core: pure configuration logic
impl DatabaseConnection {
    fn create_connect_options(config: &DatabaseConfig) -> sqlx::sqlite::SqliteConnectOptions {
        use sqlx::ConnectOptions;
        use sqlx::sqlite::SqliteConnectOptions;

        let mut options = SqliteConnectOptions::new()
            .filename(config.path().as_path())
            .create_if_missing(true);

        if config.enable_wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }

        if config.enable_foreign_keys {
            options = options.pragma("foreign_keys", "ON");
        }

        options.disable_statement_logging()
    }
}

// Imperative shell: I/O operations
impl DatabaseConnection {
    /// Initialize the database connection
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the pool
    /// cannot connect, or the pragmas cannot be applied
    pub async fn initialize(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path().parent_directory() {
            tokio::fs::create_dir_all(&parent).await.map_err(|e| {
                FlockError::Database {
                    message: format!("failed to create directory {}: {e}", parent.display()),
                }
            })?;
        }

        let options = Self::create_connect_options(&config);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| FlockError::Database {
                message: format!("failed to create connection pool: {e}"),
            })?;

        Self::apply_database_settings(&pool).await?;

        info!(path = %config.path(), "SQLite store opened");
        Ok(Self { pool, config })
    }

    /// Apply connection-wide pragmas.
    ///
    /// Synchronous = NORMAL trades a little durability for write throughput
    /// while remaining crash-safe under WAL.
    async fn apply_database_settings(pool: &Pool<Sqlite>) -> Result<()> {
        for pragma in [
            "PRAGMA synchronous = NORMAL",
            "PRAGMA temp_store = MEMORY",
            "PRAGMA cache_size = -65536",
        ] {
            sqlx::query(pragma)
                .execute(pool)
                .await
                .map_err(|e| FlockError::Database {
                    message: format!("failed to apply {pragma}: {e}"),
                })?;
        }
        Ok(())
    }

    /// Test the database connection
    ///
    /// # Errors
    ///
    /// Returns an error if the connection test fails
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| FlockError::Database {
                message: format!("connection test failed: {e}"),
            })?;
        Ok(())
    }

    /// Get access to the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Get the database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Close the pool, releasing file handles
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_should_create_valid_database_path_when_given_db_extension() {
        let path = DatabasePath::new("flock.db").unwrap();
        assert!(path.to_string().contains("flock.db"));
    }

    #[test]
    fn test_should_reject_empty_path_when_creating_database_path() {
        assert!(DatabasePath::new("").is_err());
    }

    #[test]
    fn test_should_reject_invalid_extension_when_creating_database_path() {
        assert!(DatabasePath::new("flock.txt").is_err());
    }

    #[tokio::test]
    async fn test_should_initialize_connection_when_given_valid_config() {
        let temp_dir = tempdir().unwrap();
        let path = DatabasePath::new(temp_dir.path().join("flock.db")).unwrap();
        let connection = DatabaseConnection::initialize(DatabaseConfig::for_testing(path))
            .await
            .unwrap();
        connection.test_connection().await.unwrap();
        connection.close().await;
    }

    #[tokio::test]
    async fn test_should_create_parent_directories_when_path_is_nested() {
        let temp_dir = tempdir().unwrap();
        let path = DatabasePath::new(temp_dir.path().join("deep/nested/flock.db")).unwrap();
        let connection = DatabaseConnection::initialize(DatabaseConfig::new(path))
            .await
            .unwrap();
        connection.test_connection().await.unwrap();
        connection.close().await;
    }
}
