use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed after all strategies: {last_error}")]
    Navigation { url: String, last_error: String },

    #[error("navigation attempt failed: {0}")]
    Attempt(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("script evaluation failed: {0}")]
    Evaluate(String),
}

impl BrowserError {
    /// Whether the error came from the attempt-level timeout guard.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
