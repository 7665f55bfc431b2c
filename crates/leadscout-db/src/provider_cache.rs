//! Phone-number to carrier cache.
//!
//! A pure data-access component: the cache never performs network I/O.
//! Reads return whatever is stored regardless of age; staleness is only
//! acted on by the explicit [`cleanup`] sweep or by a fresh lookup
//! overwriting the row. Providers change rarely, so this trades a small
//! staleness risk for skipping expensive re-lookups.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// One cached carrier resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCacheEntry {
    /// Normalized phone number (cache key)
    pub phone_number: String,
    /// Carrier name
    pub provider: String,
    /// Lookup confidence in [0, 1]
    pub confidence: f64,
    /// When the lookup was last performed
    pub last_checked: DateTime<Utc>,
}

impl ProviderCacheEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn now(phone_number: impl Into<String>, provider: impl Into<String>, confidence: f64) -> Self {
        Self {
            phone_number: phone_number.into(),
            provider: provider.into(),
            confidence,
            last_checked: Utc::now(),
        }
    }
}

/// Normalize a phone number into its cache-key form.
///
/// Strips every non-digit character and drops a leading `1` country prefix
/// from 11-digit numbers. Returns `None` for anything shorter than 7
/// digits, which cannot be a dialable number.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let digits = if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    };

    if digits.len() < 7 {
        return None;
    }
    Some(digits)
}

/// Look up a cached entry by (raw or normalized) phone number.
///
/// Age is never checked here; a stale entry is still a hit.
pub async fn get(pool: &SqlitePool, phone: &str) -> Result<Option<ProviderCacheEntry>> {
    let Some(key) = normalize_phone(phone) else {
        return Ok(None);
    };

    let row = sqlx::query_as::<_, (String, String, f64, String)>(
        "SELECT phone_number, provider, confidence, last_checked
         FROM provider_cache WHERE phone_number = ?",
    )
    .bind(&key)
    .fetch_optional(pool)
    .await?;

    row.map(|(phone_number, provider, confidence, last_checked)| {
        Ok(ProviderCacheEntry {
            phone_number,
            provider,
            confidence,
            last_checked: DateTime::parse_from_rfc3339(&last_checked)
                .map_err(|e| {
                    DatabaseError::Decode(format!("invalid last_checked '{last_checked}': {e}"))
                })?
                .with_timezone(&Utc),
        })
    })
    .transpose()
}

/// Write a batch of entries in one transaction (last write wins per key).
///
/// Batched so high-volume lookup sessions pay one fsync, not one per
/// number. Entries whose phone number fails normalization are skipped with
/// a warning rather than failing the batch.
pub async fn put_many(pool: &SqlitePool, entries: &[ProviderCacheEntry]) -> Result<u64> {
    if entries.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut written = 0u64;

    for entry in entries {
        let Some(key) = normalize_phone(&entry.phone_number) else {
            tracing::warn!(
                "Skipping cache write for unnormalizable phone number '{}'",
                entry.phone_number
            );
            continue;
        };

        sqlx::query(
            "INSERT INTO provider_cache (phone_number, provider, confidence, last_checked)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (phone_number) DO UPDATE SET
                 provider = excluded.provider,
                 confidence = excluded.confidence,
                 last_checked = excluded.last_checked",
        )
        .bind(&key)
        .bind(&entry.provider)
        .bind(entry.confidence)
        .bind(entry.last_checked.to_rfc3339())
        .execute(tx.as_mut())
        .await?;

        written += 1;
    }

    tx.commit().await?;

    tracing::debug!("Wrote {} provider cache entries", written);
    Ok(written)
}

/// Delete entries whose `last_checked` is older than `max_age_days`.
///
/// Returns the number of rows removed.
pub async fn cleanup(pool: &SqlitePool, max_age_days: u32) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));

    let result = sqlx::query("DELETE FROM provider_cache WHERE last_checked < ?")
        .bind(cutoff.to_rfc3339())
        .execute(pool)
        .await?;

    let deleted = result.rows_affected();
    if deleted > 0 {
        tracing::info!(
            "Provider cache cleanup removed {} entries older than {} days",
            deleted,
            max_age_days
        );
    }

    Ok(deleted)
}
