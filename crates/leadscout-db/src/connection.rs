//! Database connection management.
//!
//! Builds the `SQLite` connection pool used by the retry queue, provider
//! cache and job records. Retry-queue writes must land synchronously so an
//! interrupted process can resume, so the pool runs with WAL journaling and
//! `synchronous = NORMAL`.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// Create a connection pool for the database at `path`.
///
/// The file is created if missing. Pass `:memory:` for an in-memory
/// database (used throughout the test suites).
///
/// # Errors
/// Returns `DatabaseError::Open` if the path is invalid or the pool cannot
/// be established.
pub async fn create_pool(path: impl AsRef<Path>) -> Result<Pool<Sqlite>> {
    let path_str = path.as_ref().to_str().ok_or_else(|| {
        DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
    })?;

    let connect_options = SqliteConnectOptions::from_str(path_str)
        .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    // An in-memory database exists per connection, so the pool must not
    // open more than one.
    let max_connections = if path_str == ":memory:" { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connect_options)
        .await
        .map_err(|e| DatabaseError::Open(format!("failed to create pool: {e}")))?;

    tracing::info!("Database pool created at {}", path_str);

    Ok(pool)
}
