//! Leadscout Database Layer
//!
//! Provides `SQLite` persistence for the scraping pipeline: the durable
//! retry queue, the provider-lookup cache and scrape job records. Uses
//! `SQLx` with embedded, versioned migrations.
//!
//! # Example
//!
//! ```ignore
//! use leadscout_db::Database;
//!
//! let db = Database::new("leadscout.db").await?;
//! db.run_migrations().await?;
//! ```
//!
//! # Design Principles
//!
//! - Retry-queue and cache writes are whole-row upserts keyed by a natural
//!   key, so concurrent batches cannot corrupt each other
//! - Every retry-queue transition is persisted before the caller proceeds,
//!   enabling exact resumption after a process restart
//! - Migrations run automatically on startup and are idempotent

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod migrations;
pub mod provider_cache;
pub mod retry_queue;
pub mod scrape_jobs;

// Re-export commonly used types
pub use error::{DatabaseError, Result};
pub use provider_cache::{normalize_phone, ProviderCacheEntry};
pub use retry_queue::{RetryItem, RetryItemType, RetryPolicy};
pub use scrape_jobs::ScrapeJobRecord;

use std::path::Path;

/// High-level database interface with automatic migrations.
#[derive(Debug)]
pub struct Database {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl Database {
    /// Open (or create) the database at the specified path.
    ///
    /// Pass `:memory:` for an in-memory database.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::create_pool(path).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool in the `Database` interface.
    #[must_use]
    pub fn from_pool(pool: sqlx::Pool<sqlx::Sqlite>) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the current schema version (highest applied migration).
    ///
    /// # Errors
    /// Returns `DatabaseError` if the version cannot be queried.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
