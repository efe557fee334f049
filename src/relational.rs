//! Relational (`SQLite`) connection management for workspaces, agents,
//! probes, targets, alert rules, and alerts (§3, §6 "Relational tables").
//!
//! ## Architecture
//!
//! - **Functional core**: configuration validation, connection string
//!   generation.
//! - **Imperative shell**: file system operations, pool creation, migrations.

use crate::domain::ConnectionPoolSize;
use nutype::nutype;
use sqlx::{migrate::Migrator, Pool, Sqlite, SqlitePool};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

static MIGRATOR: Migrator = sqlx::migrate!();

/// Relational-store-specific error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database error from `SQLx`.
    #[error("database error: {message}")]
    Database {
        /// Error message from the database operation.
        message: String,
    },
    /// File system I/O error.
    #[error("file system error: {message}")]
    FileSystem {
        /// Error message from the file system operation.
        message: String,
    },
    /// Invalid configuration.
    #[error("configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the configuration field that was invalid.
        field: String,
        /// Reason the configuration was invalid.
        reason: String,
    },
    /// Connection pool error.
    #[error("connection pool error: {message}")]
    ConnectionPool {
        /// Error message from the connection pool operation.
        message: String,
    },
    /// Migration error.
    #[error("migration failed: {message}")]
    Migration {
        /// Error message from the migration operation.
        message: String,
    },
}

/// Top-level relational error type.
#[derive(Error, Debug)]
pub enum RelationalError {
    /// Error from `SQLx`.
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Relational operation result.
pub type RelationalResult<T> = Result<T, RelationalError>;

/// Validated result for pure functions.
pub type StorageResult<T> = Result<T, StorageError>;

#[nutype(
    sanitize(with = |path: PathBuf| path),
    validate(predicate = |path| !path.as_os_str().is_empty() && path.extension().is_some_and(|ext| ext == "db")),
    derive(Clone, Debug, Eq, PartialEq)
)]
pub struct DatabasePath(PathBuf);

impl DatabasePath {
    /// Creates a new validated database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty or lacks a `.db` extension.
    pub fn new<P: AsRef<Path>>(path: P) -> RelationalResult<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Self::try_new(path_buf).map_err(|_| {
            RelationalError::Storage(StorageError::Configuration {
                field: "database_path".to_string(),
                reason: "path is empty or has an invalid extension (must be .db)".to_string(),
            })
        })
    }

    /// Returns the path as a `PathBuf`.
    #[must_use]
    pub fn as_path(&self) -> PathBuf {
        self.clone().into_inner()
    }

    /// Generates the `SQLite` connection string.
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.as_path().display())
    }

    /// Returns the parent directory, for creation.
    #[must_use]
    pub fn parent_directory(&self) -> Option<PathBuf> {
        self.as_path().parent().map(std::path::Path::to_path_buf)
    }
}

impl std::fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}

/// Relational store configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationalConfig {
    path: DatabasePath,
    pool_size: ConnectionPoolSize,
    enable_wal_mode: bool,
    enable_foreign_keys: bool,
}

impl RelationalConfig {
    /// Creates a new config with default pool settings.
    #[must_use]
    pub fn new(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::default(),
            enable_wal_mode: true,
            enable_foreign_keys: true,
        }
    }

    /// Creates a minimal config for tests.
    ///
    /// # Panics
    ///
    /// Panics if pool size `1` is rejected by `ConnectionPoolSize` (cannot
    /// happen; `1` is within its validated range).
    #[must_use]
    pub fn for_testing(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::try_new(1).expect("pool size 1 is always valid"),
            enable_wal_mode: false,
            enable_foreign_keys: false,
        }
    }

    /// Sets the connection pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: ConnectionPoolSize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// Returns the pool size.
    #[must_use]
    pub fn pool_size(&self) -> ConnectionPoolSize {
        self.pool_size
    }

    /// Returns whether WAL mode is enabled.
    #[must_use]
    pub fn wal_mode_enabled(&self) -> bool {
        self.enable_wal_mode
    }

    /// Returns whether `PRAGMA foreign_keys` is enabled.
    #[must_use]
    pub fn foreign_keys_enabled(&self) -> bool {
        self.enable_foreign_keys
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> StorageResult<()> {
        if self.pool_size.as_usize() == 0 {
            return Err(StorageError::Configuration {
                field: "pool_size".to_string(),
                reason: "pool size must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Managed `SQLite` connection pool plus the config it was built from.
#[derive(Clone)]
pub struct RelationalConnection {
    pool: Pool<Sqlite>,
    config: RelationalConfig,
}

impl RelationalConnection {
    fn create_connect_options(config: &RelationalConfig) -> sqlx::sqlite::SqliteConnectOptions {
        use sqlx::sqlite::SqliteConnectOptions;
        use sqlx::ConnectOptions;

        let mut options = SqliteConnectOptions::new()
            .filename(config.path().as_path())
            .create_if_missing(true);

        if config.wal_mode_enabled() {
            options = options.pragma("journal_mode", "WAL");
        }
        if config.foreign_keys_enabled() {
            options = options.pragma("foreign_keys", "ON");
        }

        options.disable_statement_logging()
    }

    /// Initializes the connection pool: directory, pool, pragmas, migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation, directory creation,
    /// pool creation, or migration fails.
    #[tracing::instrument(skip(config), fields(path = %config.path()), err)]
    pub async fn initialize(config: RelationalConfig) -> RelationalResult<Self> {
        config.validate().map_err(RelationalError::Storage)?;
        Self::ensure_parent_directory_exists(&config).await?;
        let pool = Self::create_connection_pool(&config).await?;
        Self::apply_pragmas(&pool).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool, config })
    }

    async fn ensure_parent_directory_exists(config: &RelationalConfig) -> RelationalResult<()> {
        if let Some(parent) = config.path().parent_directory() {
            tokio::fs::create_dir_all(&parent).await.map_err(|e| {
                RelationalError::Storage(StorageError::FileSystem {
                    message: format!("failed to create directory {}: {e}", parent.display()),
                })
            })?;
        }
        Ok(())
    }

    async fn create_connection_pool(config: &RelationalConfig) -> RelationalResult<Pool<Sqlite>> {
        let options = Self::create_connect_options(config);
        SqlitePool::connect_with(options).await.map_err(|e| {
            RelationalError::Storage(StorageError::ConnectionPool {
                message: format!("failed to create connection pool: {e}"),
            })
        })
    }

    async fn apply_pragmas(pool: &Pool<Sqlite>) -> RelationalResult<()> {
        for pragma in [
            "PRAGMA synchronous = NORMAL",
            "PRAGMA cache_size = -65536",
            "PRAGMA temp_store = MEMORY",
        ] {
            sqlx::query(pragma).execute(pool).await.map_err(|e| {
                RelationalError::Storage(StorageError::Database {
                    message: format!("failed to apply '{pragma}': {e}"),
                })
            })?;
        }
        Ok(())
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> RelationalResult<()> {
        info!("running relational store migrations");
        match MIGRATOR.run(pool).await {
            Ok(()) => {
                info!("relational store migrations complete");
                Ok(())
            }
            Err(e) => {
                warn!("relational store migration failed: {e}");
                Err(RelationalError::Storage(StorageError::Migration {
                    message: format!("schema migration failed: {e}"),
                }))
            }
        }
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Returns the configuration this connection was built from.
    #[must_use]
    pub fn config(&self) -> &RelationalConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_accepts_db_extension() {
        let path = DatabasePath::new("test.db").unwrap();
        assert!(path.to_connection_string().contains("test.db"));
    }

    #[test]
    fn database_path_rejects_empty_path() {
        let result = DatabasePath::new("");
        assert!(result.is_err());
    }

    #[test]
    fn database_path_rejects_non_db_extension() {
        let result = DatabasePath::new("test.txt");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn initialize_creates_pool_and_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = DatabasePath::new(dir.path().join("netwatcher.db")).unwrap();
        let config = RelationalConfig::for_testing(path);
        let conn = RelationalConnection::initialize(config).await.unwrap();
        sqlx::query("SELECT 1").execute(conn.pool()).await.unwrap();
    }
}
