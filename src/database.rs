//! Embedded SQLite storage plumbing.
//!
//! Provides the shared connection pool used by the evidence store and the
//! network mode manager. Schema creation is handled by the embedded
//! migration system during [`DatabaseConnection::initialize`].

use sqlx::{migrate::Migrator, Pool, Sqlite};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Static migrator for embedded `SQLite` migrations.
static MIGRATOR: Migrator = sqlx::migrate!();

/// Database-specific error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Database error from `SQLx`.
    #[error("Database error: {message}")]
    Database {
        /// Error message from the database operation.
        message: String,
    },

    /// File system I/O error.
    #[error("File system error: {message}")]
    FileSystem {
        /// Error message from the file system operation.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the configuration field that was invalid.
        field: String,
        /// Reason why the configuration was invalid.
        reason: String,
    },

    /// Migration error.
    #[error("Migration failed: {message}")]
    Migration {
        /// Error message from the migration run.
        message: String,
    },
}

/// Database result type.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database configuration with pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    path: PathBuf,
    max_connections: u32,
    enable_wal_mode: bool,
}

impl DatabaseConfig {
    /// Creates a database config with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty.
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(DatabaseError::Configuration {
                field: "database_path".to_string(),
                reason: "Path must not be empty".to_string(),
            });
        }
        Ok(Self {
            path,
            max_connections: 5,
            enable_wal_mode: true,
        })
    }

    /// Creates a config for tests: single connection, no WAL.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty.
    pub fn for_testing<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let mut config = Self::new(path)?;
        config.max_connections = 1;
        config.enable_wal_mode = false;
        Ok(config)
    }

    /// Builder pattern: set the maximum pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Gets the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Database connection with a managed pool.
///
/// A single-writer SQLite pool is sufficient for the gateway's write rate;
/// WAL mode keeps readers from blocking the writer.
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
}

impl DatabaseConnection {
    fn connect_options(config: &DatabaseConfig) -> sqlx::sqlite::SqliteConnectOptions {
        use sqlx::ConnectOptions;
        use sqlx::sqlite::SqliteConnectOptions;

        let mut options = SqliteConnectOptions::new()
            .filename(config.path())
            .create_if_missing(true)
            .pragma("foreign_keys", "ON");

        if config.enable_wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }

        options.disable_statement_logging()
    }

    /// Opens the pool, creates parent directories, and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection, or a migration
    /// fails.
    pub async fn initialize(config: DatabaseConfig) -> DatabaseResult<Self> {
        if let Some(parent) = config.path().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DatabaseError::FileSystem {
                        message: format!(
                            "Failed to create directory {}: {e}",
                            parent.display()
                        ),
                    }
                })?;
            }
        }

        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(Self::connect_options(&config))
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to open database pool: {e}"),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration {
                message: format!("Schema migration failed: {e}"),
            })?;

        info!(path = %config.path().display(), "Initialized gateway database");
        Ok(Self { pool })
    }

    /// Opens an in-memory database, for tests and ephemeral deployments.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn in_memory() -> DatabaseResult<Self> {
        // A single connection keeps every query on the same in-memory
        // database; separate pooled connections would each see their own.
        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(1)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new().filename(":memory:"),
            )
            .await
            .map_err(|e| DatabaseError::Database {
                message: format!("Failed to open in-memory database: {e}"),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration {
                message: format!("Schema migration failed: {e}"),
            })?;

        Ok(Self { pool })
    }

    /// Gets access to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
