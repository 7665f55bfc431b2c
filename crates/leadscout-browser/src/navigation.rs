//! Resilient page navigation.
//!
//! [`NavigationManager`] wraps a single navigation primitive with three
//! layers of resilience:
//!
//! 1. **Exponential backoff**: failed attempts are retried up to
//!    `max_retries` times per wait strategy, sleeping `base_delay * 2^n`
//!    after the n-th failure.
//! 2. **Wait-strategy fallback**: strategies are tried in a ladder from
//!    strictest to most permissive (`NetworkIdle2 → NetworkIdle0 →
//!    DomContentLoaded → Load`), each with its own retry budget.
//! 3. **Adaptive timeout**: the per-attempt timeout tracks a rolling
//!    window of recent navigation durations, so the manager tightens up
//!    when the target is fast and loosens when it is slow, without manual
//!    tuning.
//!
//! The navigation primitive itself is behind the [`PageNavigator`] trait so
//! the retry machinery is exercised in tests without a real browser.

use crate::error::{BrowserError, Result};
use chromiumoxide::Page;
use leadscout_core::NavigationConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How long to wait for a page to be considered loaded.
///
/// Mirrors the classic headless-browser `waitUntil` ladder; the network
/// idle variants differ only in how many in-flight requests they tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// At most 2 network connections in flight over the quiet window
    NetworkIdle2,
    /// No network connections in flight over the quiet window
    NetworkIdle0,
    /// DOM parsed, subresources may still be loading
    DomContentLoaded,
    /// Full load event fired
    Load,
}

impl WaitStrategy {
    /// Fallback ladder, strictest first.
    pub const LADDER: [Self; 4] = [
        Self::NetworkIdle2,
        Self::NetworkIdle0,
        Self::DomContentLoaded,
        Self::Load,
    ];

    /// In-flight request budget for the network-idle variants.
    #[must_use]
    pub fn allowed_inflight(self) -> Option<usize> {
        match self {
            Self::NetworkIdle2 => Some(2),
            Self::NetworkIdle0 => Some(0),
            Self::DomContentLoaded | Self::Load => None,
        }
    }
}

impl std::fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkIdle2 => write!(f, "networkidle2"),
            Self::NetworkIdle0 => write!(f, "networkidle0"),
            Self::DomContentLoaded => write!(f, "domcontentloaded"),
            Self::Load => write!(f, "load"),
        }
    }
}

/// Navigation primitive the retry machinery drives.
///
/// Production code uses [`CdpNavigator`]; tests substitute fakes.
#[async_trait::async_trait]
pub trait PageNavigator: Send + Sync {
    /// Navigate to `url` and wait for the page to settle per `strategy`,
    /// failing with [`BrowserError::Timeout`] once `timeout` elapses.
    async fn goto(&self, url: &str, strategy: WaitStrategy, timeout: Duration) -> Result<()>;

    /// Full HTML of the current page.
    async fn content(&self) -> Result<String>;
}

/// Details of a successful resilient navigation.
#[derive(Debug, Clone, Copy)]
pub struct NavigationOutcome {
    /// Strategy that finally succeeded
    pub strategy: WaitStrategy,
    /// 0-indexed attempt within that strategy
    pub attempt: u32,
    /// Observed navigation duration
    pub duration: Duration,
    /// Timeout that was in force for the attempt
    pub timeout_used: Duration,
}

/// Point-in-time view of the adaptive timeout state, for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct NavigationStats {
    /// Timeout the next attempt will use
    pub current_timeout: Duration,
    /// Mean of the rolling duration window, if any samples exist
    pub mean_nav_time: Option<Duration>,
    /// Number of samples in the window
    pub samples: usize,
}

/// Resilient navigation: retries, strategy fallback, adaptive timeout.
///
/// Owns per-session attempt state (the rolling duration window); call
/// [`reset`](Self::reset) at session boundaries so one job's latency
/// profile doesn't skew the next.
pub struct NavigationManager {
    config: NavigationConfig,
    window: VecDeque<Duration>,
    current_timeout: Duration,
}

impl NavigationManager {
    /// Create a manager with the given navigation configuration.
    #[must_use]
    pub fn new(config: NavigationConfig) -> Self {
        let current_timeout = config.initial_timeout();
        Self {
            config,
            window: VecDeque::new(),
            current_timeout,
        }
    }

    /// Navigate with the full resilience ladder.
    ///
    /// Worst case issues `max_retries * 4` attempts. On terminal failure
    /// the caller converts the error into a retry item; a navigation
    /// failure is never a reason to abort a whole job.
    pub async fn navigate_with_retry<N: PageNavigator + ?Sized>(
        &mut self,
        navigator: &N,
        url: &str,
    ) -> Result<NavigationOutcome> {
        let mut last_error: Option<BrowserError> = None;

        for strategy in WaitStrategy::LADDER {
            for attempt in 0..self.config.max_retries {
                if let Some(delay) = backoff_delay(self.config.base_delay(), attempt) {
                    tracing::debug!(
                        "Waiting {:?} before attempt {} ({}) for {}",
                        delay,
                        attempt,
                        strategy,
                        url
                    );
                    tokio::time::sleep(delay).await;
                }

                let timeout_used = self.current_timeout;
                let started = Instant::now();

                match navigator.goto(url, strategy, timeout_used).await {
                    Ok(()) => {
                        let duration = started.elapsed();
                        self.observe(duration);
                        tracing::info!(
                            "Navigation to {} succeeded ({}, attempt {}, {:?} of {:?} budget)",
                            url,
                            strategy,
                            attempt,
                            duration,
                            timeout_used
                        );
                        return Ok(NavigationOutcome {
                            strategy,
                            attempt,
                            duration,
                            timeout_used,
                        });
                    }
                    Err(err) => {
                        if err.is_timeout() {
                            // A timed-out attempt is evidence the target is
                            // slow; feed the full budget into the window so
                            // future timeouts stretch.
                            self.observe(timeout_used);
                        }
                        tracing::warn!(
                            "Navigation to {} failed ({}, attempt {}/{}, timeout {:?}): {}",
                            url,
                            strategy,
                            attempt + 1,
                            self.config.max_retries,
                            timeout_used,
                            err
                        );
                        last_error = Some(err);
                    }
                }
            }

            tracing::warn!(
                "Strategy {} exhausted for {}, falling back to the next strategy",
                strategy,
                url
            );
        }

        Err(BrowserError::Navigation {
            url: url.to_string(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts were made".to_string()),
        })
    }

    /// Record a duration observation and recompute the adaptive timeout.
    ///
    /// The timeout moves halfway from its current value toward 1.25x the
    /// rolling mean, clamped to the configured bounds, so a single outlier
    /// nudges rather than swings it.
    fn observe(&mut self, duration: Duration) {
        if self.window.len() >= self.config.sample_window {
            self.window.pop_front();
        }
        self.window.push_back(duration);

        let mean_ms = self.mean_millis().unwrap_or(self.config.initial_timeout_ms as f64);
        let target_ms = mean_ms * 1.25;
        let current_ms = millis_f64(self.current_timeout);
        let next_ms = (current_ms + target_ms) / 2.0;

        let clamped = next_ms
            .max(self.config.min_timeout_ms as f64)
            .min(self.config.max_timeout_ms as f64);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.current_timeout = Duration::from_millis(clamped as u64);
        }
    }

    fn mean_millis(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let total: f64 = self.window.iter().map(|d| millis_f64(*d)).sum();
        #[allow(clippy::cast_precision_loss)]
        Some(total / self.window.len() as f64)
    }

    /// Current adaptive-timeout state for monitoring dashboards.
    #[must_use]
    pub fn stats(&self) -> NavigationStats {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mean_nav_time = self
            .mean_millis()
            .map(|ms| Duration::from_millis(ms as u64));

        NavigationStats {
            current_timeout: self.current_timeout,
            mean_nav_time,
            samples: self.window.len(),
        }
    }

    /// Clear the rolling window and restore the initial timeout.
    ///
    /// Called at orchestrator session boundaries to avoid cross-job skew.
    pub fn reset(&mut self) {
        self.window.clear();
        self.current_timeout = self.config.initial_timeout();
        tracing::debug!("Navigation state reset");
    }
}

/// Delay before the given 0-indexed attempt within one strategy: none for
/// the first attempt, `base * 2^(n-1)` before attempt `n`.
fn backoff_delay(base: Duration, attempt: u32) -> Option<Duration> {
    if attempt == 0 {
        return None;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    Some(base.saturating_mul(factor))
}

fn millis_f64(d: Duration) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        d.as_millis() as f64
    }
}

/// Chromiumoxide-backed [`PageNavigator`].
pub struct CdpNavigator {
    page: Page,
    poll_interval: Duration,
    quiet_window: Duration,
}

impl CdpNavigator {
    /// Wrap a page for resilient navigation.
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self {
            page,
            poll_interval: Duration::from_millis(250),
            quiet_window: Duration::from_millis(500),
        }
    }

    /// Access the underlying page (for extraction helpers).
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn ready_state(&self) -> Result<String> {
        self.page
            .evaluate("document.readyState")
            .await
            .map_err(|e| BrowserError::Evaluate(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| BrowserError::Evaluate(e.to_string()))
    }

    async fn resource_count(&self) -> Result<usize> {
        self.page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .map_err(|e| BrowserError::Evaluate(e.to_string()))?
            .into_value::<usize>()
            .map_err(|e| BrowserError::Evaluate(e.to_string()))
    }

    /// Wait until the DOM has finished parsing.
    async fn settle_dom(&self) -> Result<()> {
        loop {
            if self.ready_state().await? != "loading" {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait for the load event, then for resource activity to quiet down.
    ///
    /// Chromium doesn't expose network-idle directly over CDP, so this
    /// approximates it: the page is idle once the resource-entry count
    /// grows by at most `allowed` over one quiet window.
    async fn settle_network_idle(&self, allowed: usize) -> Result<()> {
        while self.ready_state().await? != "complete" {
            tokio::time::sleep(self.poll_interval).await;
        }

        let mut previous = self.resource_count().await?;
        loop {
            tokio::time::sleep(self.quiet_window).await;
            let current = self.resource_count().await?;
            if current.saturating_sub(previous) <= allowed {
                return Ok(());
            }
            previous = current;
        }
    }
}

#[async_trait::async_trait]
impl PageNavigator for CdpNavigator {
    async fn goto(&self, url: &str, strategy: WaitStrategy, timeout: Duration) -> Result<()> {
        let navigate = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::Attempt(e.to_string()))?;

            match strategy {
                WaitStrategy::Load => {
                    self.page
                        .wait_for_navigation()
                        .await
                        .map_err(|e| BrowserError::Attempt(e.to_string()))?;
                    Ok(())
                }
                WaitStrategy::DomContentLoaded => self.settle_dom().await,
                WaitStrategy::NetworkIdle0 | WaitStrategy::NetworkIdle2 => {
                    let allowed = strategy
                        .allowed_inflight()
                        .unwrap_or_default();
                    self.settle_network_idle(allowed).await
                }
            }
        };

        tokio::time::timeout(timeout, navigate)
            .await
            .map_err(|_| BrowserError::Timeout(timeout))?
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))
    }
}
