//! # State Database
//!
//! SQLite connection pool for the artifact state store.
//!
//! ## Durability
//!
//! - **WAL journal** with `synchronous = FULL`: a committed transaction
//!   survives power loss, and readers see either the pre- or post-write value.
//! - **Migrations** are embedded with `sqlx::migrate!` and applied on open.
//! - **Integrity check** runs after migrations; a damaged file is reported as
//!   [`SyncError::StateStoreCorruption`] instead of being silently reused.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("/var/lib/harvest-indexer/state.db")).await?;
//! ```

use crate::{Result, SyncError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQLite error codes that mean the file cannot be trusted.
const SQLITE_CORRUPT: &str = "11";
const SQLITE_NOTADB: &str = "26";

/// Database configuration for the state store pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:` URL of the database file, or `sqlite::memory:`
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Configuration for a database file at `database_path`.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// In-memory database for tests.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool is pinned to a single connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured pool, run migrations and verify integrity.
///
/// # Errors
///
/// Returns [`SyncError::StateStoreCorruption`] when the file is not a SQLite
/// database or fails `PRAGMA integrity_check`, and [`SyncError::Database`]
/// for any other open failure.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening artifact state database"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| SyncError::Config(format!("Invalid database URL: {}", e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open state database");
            classify_open_error(e)
        })?;

    run_migrations(&pool).await?;
    integrity_check(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Running state database migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        let message = e.to_string();
        if looks_corrupt(&message) {
            SyncError::StateStoreCorruption(message)
        } else {
            SyncError::Database(format!("Migration failed: {}", message))
        }
    })?;

    Ok(())
}

async fn integrity_check(pool: &Pool<Sqlite>) -> Result<()> {
    let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
        .fetch_one(pool)
        .await
        .map_err(classify_open_error)?;

    if verdict != "ok" {
        warn!(verdict = %verdict, "State database failed integrity check");
        return Err(SyncError::StateStoreCorruption(verdict));
    }

    debug!("State database integrity check passed");
    Ok(())
}

fn looks_corrupt(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("not a database") || message.contains("malformed")
}

/// Map an open/query failure, singling out corrupt or foreign files.
pub(crate) fn classify_open_error(error: sqlx::Error) -> SyncError {
    if let sqlx::Error::Database(db_error) = &error {
        if matches!(db_error.code().as_deref(), Some(SQLITE_CORRUPT | SQLITE_NOTADB)) {
            return SyncError::StateStoreCorruption(db_error.message().to_string());
        }
    }
    let message = error.to_string();
    if looks_corrupt(&message) {
        SyncError::StateStoreCorruption(message)
    } else {
        SyncError::Database(message)
    }
}
