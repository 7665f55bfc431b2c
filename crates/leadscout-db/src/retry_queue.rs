//! Durable retry queue for failed work items.
//!
//! Every state transition (enqueue, retry, ack, abandon) is written to
//! `SQLite` before the caller proceeds, so an interrupted job resumes
//! exactly where it left off by re-reading [`dequeue_ready`]. Item identity
//! is `(session_id, item_type, item_key)`; re-enqueueing the same failure
//! is an idempotent upsert that bumps the attempt counter, never a
//! duplicate row.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leadscout_core::config::RetryConfig;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::time::Duration;

/// Kind of work a retry item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryItemType {
    /// A (town, industry) scrape unit
    WorkUnit,
    /// A carrier lookup for one phone number
    ProviderLookup,
}

impl fmt::Display for RetryItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkUnit => write!(f, "WorkUnit"),
            Self::ProviderLookup => write!(f, "ProviderLookup"),
        }
    }
}

impl std::str::FromStr for RetryItemType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WorkUnit" => Ok(Self::WorkUnit),
            "ProviderLookup" => Ok(Self::ProviderLookup),
            other => Err(DatabaseError::Decode(format!(
                "unknown retry item type '{other}'"
            ))),
        }
    }
}

/// A persisted record of a failed unit of work awaiting a scheduled retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryItem {
    /// Row identifier
    pub id: String,
    /// Session the item belongs to
    pub session_id: String,
    /// Kind of work represented
    pub item_type: RetryItemType,
    /// Natural key of the item within the session
    pub item_key: String,
    /// JSON payload needed to re-run the item
    pub payload: serde_json::Value,
    /// Number of failed attempts so far (monotonically increasing)
    pub attempts: u32,
    /// Earliest time the item may be retried
    pub next_retry_at: DateTime<Utc>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// First failure time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl RetryItem {
    /// Whether the item has used up its attempt budget under `policy`.
    #[must_use]
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }
}

/// Backoff schedule and attempt ceiling for the retry queue.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before an item is abandoned
    pub max_attempts: u32,
    /// Base delay for the doubling backoff
    pub base_delay: Duration,
    /// Cap on the backoff interval
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// Build a policy from the retry section of the app config.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_interval: Duration::from_secs(config.max_interval_secs),
        }
    }

    /// Delay before the next retry after `attempts` failures:
    /// `base_delay * 2^attempts`, capped at `max_interval`.
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.min(20));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Record a failure, scheduling the item for a future retry.
///
/// A first failure inserts the row with `attempts = 1`; repeat failures
/// bump the counter and push `next_retry_at` further out according to the
/// doubling backoff. The write completes before this function returns.
pub async fn enqueue(
    pool: &SqlitePool,
    policy: &RetryPolicy,
    session_id: &str,
    item_type: RetryItemType,
    item_key: &str,
    payload: serde_json::Value,
    error: &str,
) -> Result<RetryItem> {
    let existing_attempts = sqlx::query_scalar::<_, i64>(
        "SELECT attempts FROM retry_items WHERE session_id = ? AND item_type = ? AND item_key = ?",
    )
    .bind(session_id)
    .bind(item_type.to_string())
    .bind(item_key)
    .fetch_optional(pool)
    .await?;

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let attempts = existing_attempts.unwrap_or(0) as u32 + 1;

    let now = Utc::now();
    let delay = policy.backoff(attempts);
    let next_retry_at = now
        + chrono::Duration::from_std(delay)
            .map_err(|e| DatabaseError::Decode(format!("backoff out of range: {e}")))?;

    let id = uuid::Uuid::new_v4().to_string();
    let payload_text = serde_json::to_string(&payload)?;

    sqlx::query(
        "INSERT INTO retry_items
             (id, session_id, item_type, item_key, payload, attempts, next_retry_at, last_error, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (session_id, item_type, item_key) DO UPDATE SET
             attempts = excluded.attempts,
             next_retry_at = excluded.next_retry_at,
             payload = excluded.payload,
             last_error = excluded.last_error,
             updated_at = excluded.updated_at",
    )
    .bind(&id)
    .bind(session_id)
    .bind(item_type.to_string())
    .bind(item_key)
    .bind(&payload_text)
    .bind(i64::from(attempts))
    .bind(next_retry_at.to_rfc3339())
    .bind(error)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    tracing::debug!(
        "Retry item {}/{} for session {} scheduled (attempt {}, next retry in {:?})",
        item_type,
        item_key,
        session_id,
        attempts,
        delay
    );

    // Re-read so the caller gets the row id actually stored (the original
    // id survives an upsert of an existing row).
    fetch_item(pool, session_id, item_type, item_key)
        .await?
        .ok_or(DatabaseError::NotFound)
}

/// Fetch the retry items of a session whose `next_retry_at` has elapsed,
/// ordered by readiness.
pub async fn dequeue_ready(pool: &SqlitePool, session_id: &str) -> Result<Vec<RetryItem>> {
    let rows = fetch_rows(
        pool,
        "SELECT id, session_id, item_type, item_key, payload, attempts, next_retry_at, last_error, created_at, updated_at
         FROM retry_items
         WHERE session_id = ? AND next_retry_at <= ?
         ORDER BY next_retry_at",
        session_id,
        Some(Utc::now()),
    )
    .await?;

    Ok(rows)
}

/// All pending retry items of a session, ready or not.
pub async fn pending(pool: &SqlitePool, session_id: &str) -> Result<Vec<RetryItem>> {
    fetch_rows(
        pool,
        "SELECT id, session_id, item_type, item_key, payload, attempts, next_retry_at, last_error, created_at, updated_at
         FROM retry_items
         WHERE session_id = ?
         ORDER BY next_retry_at",
        session_id,
        None,
    )
    .await
}

/// Number of retry items still queued for a session.
pub async fn pending_count(pool: &SqlitePool, session_id: &str) -> Result<u64> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM retry_items WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(pool)
            .await?;

    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

/// Earliest `next_retry_at` among a session's queued items, if any.
///
/// The orchestrator uses this to sleep just long enough between retry
/// passes instead of polling on a fixed interval.
pub async fn next_ready_at(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw = sqlx::query_scalar::<_, Option<String>>(
        "SELECT MIN(next_retry_at) FROM retry_items WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_one(pool)
    .await?;

    raw.map(|s| parse_timestamp(&s)).transpose()
}

/// Remove an item after it succeeded.
pub async fn ack(pool: &SqlitePool, item_id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM retry_items WHERE id = ?")
        .bind(item_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "retry item '{item_id}' not found"
        )));
    }

    Ok(())
}

/// Remove an item permanently after it exhausted its attempt budget.
///
/// The caller is responsible for surfacing the abandonment in the job's
/// failure report; nothing is silently dropped.
pub async fn abandon(pool: &SqlitePool, item: &RetryItem) -> Result<()> {
    sqlx::query("DELETE FROM retry_items WHERE id = ?")
        .bind(&item.id)
        .execute(pool)
        .await?;

    tracing::warn!(
        "Abandoning retry item {}/{} for session {} after {} attempts (last error: {})",
        item.item_type,
        item.item_key,
        item.session_id,
        item.attempts,
        item.last_error.as_deref().unwrap_or("unknown")
    );

    Ok(())
}

async fn fetch_item(
    pool: &SqlitePool,
    session_id: &str,
    item_type: RetryItemType,
    item_key: &str,
) -> Result<Option<RetryItem>> {
    let row = sqlx::query_as::<_, RowTuple>(
        "SELECT id, session_id, item_type, item_key, payload, attempts, next_retry_at, last_error, created_at, updated_at
         FROM retry_items
         WHERE session_id = ? AND item_type = ? AND item_key = ?",
    )
    .bind(session_id)
    .bind(item_type.to_string())
    .bind(item_key)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_item).transpose()
}

type RowTuple = (
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    String,
    String,
);

async fn fetch_rows(
    pool: &SqlitePool,
    query: &str,
    session_id: &str,
    ready_before: Option<DateTime<Utc>>,
) -> Result<Vec<RetryItem>> {
    let mut q = sqlx::query_as::<_, RowTuple>(query).bind(session_id);
    if let Some(cutoff) = ready_before {
        q = q.bind(cutoff.to_rfc3339());
    }

    let rows = q.fetch_all(pool).await?;
    rows.into_iter().map(row_to_item).collect()
}

fn row_to_item(row: RowTuple) -> Result<RetryItem> {
    let (id, session_id, item_type, item_key, payload, attempts, next_retry_at, last_error, created_at, updated_at) =
        row;

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    Ok(RetryItem {
        id,
        session_id,
        item_type: item_type.parse()?,
        item_key,
        payload: serde_json::from_str(&payload)?,
        attempts: attempts as u32,
        next_retry_at: parse_timestamp(&next_retry_at)?,
        last_error,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{raw}': {e}")))
}
