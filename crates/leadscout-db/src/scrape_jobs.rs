//! Scrape job records: one row per orchestrator run.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leadscout_core::{JobSpec, JobStatus, ScrapeStats};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Persisted view of a scrape job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJobRecord {
    /// Session identifier (also the job handle returned to callers)
    pub id: String,
    /// Towns in the job, in submission order
    pub towns: Vec<String>,
    /// Industries in the job, in submission order
    pub industries: Vec<String>,
    /// Whether provider lookup was requested
    pub do_provider_lookup: bool,
    /// Current status
    pub status: JobStatus,
    /// When the job row was created
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Total work units in the cross-product
    pub units_total: u32,
    /// Units that eventually succeeded
    pub units_succeeded: u32,
    /// Units abandoned after max attempts
    pub units_abandoned: u32,
    /// Business records collected
    pub businesses_found: u32,
    /// Error message for failed jobs
    pub error_message: Option<String>,
}

/// Create a new job row in `Pending` status.
pub async fn create_job(
    pool: &SqlitePool,
    session_id: &str,
    spec: &JobSpec,
    units_total: u32,
) -> Result<ScrapeJobRecord> {
    let started_at = Utc::now();
    let status = JobStatus::Pending;

    sqlx::query(
        "INSERT INTO scrape_jobs
             (id, towns, industries, do_provider_lookup, status, started_at, units_total)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(serde_json::to_string(&spec.towns)?)
    .bind(serde_json::to_string(&spec.industries)?)
    .bind(i32::from(spec.do_provider_lookup))
    .bind(status.to_string())
    .bind(started_at.to_rfc3339())
    .bind(i64::from(units_total))
    .execute(pool)
    .await?;

    Ok(ScrapeJobRecord {
        id: session_id.to_string(),
        towns: spec.towns.clone(),
        industries: spec.industries.clone(),
        do_provider_lookup: spec.do_provider_lookup,
        status,
        started_at,
        completed_at: None,
        units_total,
        units_succeeded: 0,
        units_abandoned: 0,
        businesses_found: 0,
        error_message: None,
    })
}

/// Move a job to a non-terminal status (`Running`).
pub async fn update_status(pool: &SqlitePool, session_id: &str, status: JobStatus) -> Result<()> {
    let result = sqlx::query("UPDATE scrape_jobs SET status = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(session_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scrape job '{session_id}' not found"
        )));
    }

    Ok(())
}

/// Finish a job in a terminal status with its final counters.
pub async fn finish_job(
    pool: &SqlitePool,
    session_id: &str,
    status: JobStatus,
    stats: &ScrapeStats,
    error_message: Option<&str>,
) -> Result<()> {
    debug_assert!(status.is_terminal());

    let result = sqlx::query(
        "UPDATE scrape_jobs SET
             status = ?, completed_at = ?,
             units_succeeded = ?, units_abandoned = ?, businesses_found = ?,
             error_message = ?
         WHERE id = ?",
    )
    .bind(status.to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(i64::from(stats.units_succeeded))
    .bind(i64::from(stats.units_abandoned))
    .bind(i64::from(stats.businesses_found))
    .bind(error_message)
    .bind(session_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "scrape job '{session_id}' not found"
        )));
    }

    tracing::info!("Scrape job {} finished as {}", session_id, status);
    Ok(())
}

/// Fetch a job row by session identifier.
pub async fn get_job(pool: &SqlitePool, session_id: &str) -> Result<ScrapeJobRecord> {
    type Row = (
        String,
        String,
        String,
        i64,
        String,
        String,
        Option<String>,
        i64,
        i64,
        i64,
        i64,
        Option<String>,
    );

    let row = sqlx::query_as::<_, Row>(
        "SELECT id, towns, industries, do_provider_lookup, status, started_at, completed_at,
                units_total, units_succeeded, units_abandoned, businesses_found, error_message
         FROM scrape_jobs WHERE id = ?",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DatabaseError::NotFound)?;

    let (
        id,
        towns,
        industries,
        do_provider_lookup,
        status,
        started_at,
        completed_at,
        units_total,
        units_succeeded,
        units_abandoned,
        businesses_found,
        error_message,
    ) = row;

    let parse_ts = |raw: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{raw}': {e}")))
    };

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    Ok(ScrapeJobRecord {
        id,
        towns: serde_json::from_str(&towns)?,
        industries: serde_json::from_str(&industries)?,
        do_provider_lookup: do_provider_lookup != 0,
        status: status
            .parse()
            .map_err(|e| DatabaseError::Decode(format!("{e}")))?,
        started_at: parse_ts(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        units_total: units_total as u32,
        units_succeeded: units_succeeded as u32,
        units_abandoned: units_abandoned as u32,
        businesses_found: businesses_found as u32,
        error_message,
    })
}
