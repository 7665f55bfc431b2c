//! Error taxonomy for the scraping pipeline.

use leadscout_browser::BrowserError;
use thiserror::Error;

/// Failures the pipeline distinguishes between when deciding whether to
/// retry, degrade, or abort.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// All navigation strategies exhausted for one attempt cycle. Transient:
    /// the work unit becomes a retry item, never a job abort.
    #[error("navigation failed: {0}")]
    Navigation(#[source] BrowserError),

    /// The page loaded but the expected DOM structure was absent.
    #[error("extraction failed for {url}: {reason}")]
    Extraction {
        /// Page the extraction ran against
        url: String,
        /// What was missing or malformed
        reason: String,
    },

    /// The target served a bot challenge instead of results.
    #[error("bot challenge detected at {0}")]
    BotChallenge(String),

    /// Browser launch failure or mid-batch crash. Aborts the current batch;
    /// remaining items become retry candidates.
    #[error("browser lifecycle error: {0}")]
    BrowserLifecycle(String),

    /// Carrier-lookup target unreachable or unparsable. Treated like a
    /// navigation failure for that sub-operation.
    #[error("carrier lookup failed for {phone}: {reason}")]
    Lookup {
        /// Normalized phone number being resolved
        phone: String,
        /// What went wrong
        reason: String,
    },

    /// Persistence failure in the retry queue, cache or job records.
    #[error("database error: {0}")]
    Database(#[from] leadscout_db::DatabaseError),

    /// The job submission itself was unusable.
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl ScrapeError {
    /// Whether the failed operation should be queued for retry.
    ///
    /// Everything transient is; only a malformed job submission is not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidJob(_))
    }
}

impl From<BrowserError> for ScrapeError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Launch(msg) => Self::BrowserLifecycle(msg),
            other => Self::Navigation(other),
        }
    }
}

/// Convenience alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;
