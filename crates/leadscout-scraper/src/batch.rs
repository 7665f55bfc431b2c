//! Browser batching with forced rotation.
//!
//! Amortizes browser startup cost while capping how many operations one
//! browser instance performs. The listings target starts serving bot
//! challenges after too many sequential operations from a single session,
//! so each batch gets a fresh browser (fresh fingerprint included) and the
//! instance is closed unconditionally once its batch is done, success or
//! not.

use crate::error::{Result, ScrapeError};
use leadscout_browser::{BrowserEngine, CdpNavigator};
use leadscout_core::BatchConfig;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source of browser instances and per-item navigators.
///
/// Production uses [`ChromiumFactory`]; tests substitute fakes so the
/// batching invariants are exercised without Chrome.
#[async_trait::async_trait]
pub trait BrowserFactory: Send + Sync {
    /// One browser instance.
    type Browser: Send + Sync;
    /// Navigation handle bound to a page of that browser.
    type Navigator: leadscout_browser::PageNavigator;

    /// Launch a fresh browser instance.
    async fn launch(&self) -> Result<Self::Browser>;

    /// Open a fresh page in `browser` and wrap it for navigation.
    async fn navigator(&self, browser: &Self::Browser) -> Result<Self::Navigator>;

    /// Tear the instance down. Must not be skipped on error paths.
    async fn close(&self, browser: Self::Browser);
}

/// Chromiumoxide-backed factory using the process-wide launch config.
pub struct ChromiumFactory {
    config: leadscout_core::BrowserConfig,
}

impl ChromiumFactory {
    /// Build a factory from the browser section of the app config.
    #[must_use]
    pub fn new(config: leadscout_core::BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl BrowserFactory for ChromiumFactory {
    type Browser = BrowserEngine;
    type Navigator = CdpNavigator;

    async fn launch(&self) -> Result<BrowserEngine> {
        BrowserEngine::launch(&self.config)
            .await
            .map_err(ScrapeError::from)
    }

    async fn navigator(&self, browser: &BrowserEngine) -> Result<CdpNavigator> {
        let page = browser.new_page().await?;
        Ok(CdpNavigator::new(page))
    }

    async fn close(&self, browser: BrowserEngine) {
        if let Err(e) = browser.close().await {
            tracing::warn!("Browser close failed (instance is rotated out anyway): {}", e);
        }
    }
}

/// Result of one item within a batch run.
#[derive(Debug)]
pub struct BatchOutcome<T, R> {
    /// The submitted item
    pub item: T,
    /// What happened to it
    pub result: Result<R>,
}

/// Runs work items through rotating browser instances.
pub struct BrowserBatchManager<F> {
    factory: F,
    config: BatchConfig,
}

impl<F: BrowserFactory> BrowserBatchManager<F> {
    /// Create a manager over `factory` with the given batch settings.
    #[must_use]
    pub fn new(factory: F, config: BatchConfig) -> Self {
        Self { factory, config }
    }

    /// The factory, for callers that open per-item navigators inside ops.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Batch settings in force.
    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process `items` in batches of at most `max_ops_per_browser`.
    ///
    /// For each batch exactly one browser is launched; items run strictly
    /// sequentially with `inter_item_delay` between them, and the browser
    /// is closed before the next batch starts, on every path. A failing
    /// item does not abort its batch; a failing launch fails every item of
    /// that batch (the caller routes those into the retry queue).
    ///
    /// Cancellation is honored between batches only: an open browser is
    /// allowed to finish its batch so the session is not torn down
    /// half-way. Items never started are absent from the output.
    pub async fn run_batches<T, R, Op, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        op: Op,
    ) -> Vec<BatchOutcome<T, R>>
    where
        T: Clone,
        Op: Fn(Arc<F::Browser>, T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let cap = self.config.max_ops_per_browser.max(1);
        let mut outcomes = Vec::with_capacity(items.len());
        let mut remaining = items;

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                tracing::info!(
                    "Cancellation observed at batch boundary, {} items not started",
                    remaining.len()
                );
                break;
            }

            let split = remaining.len().min(cap);
            let batch: Vec<T> = remaining.drain(..split).collect();

            let browser = match self.factory.launch().await {
                Ok(browser) => Arc::new(browser),
                Err(e) => {
                    tracing::error!("Browser launch failed, batch of {} items lost: {}", batch.len(), e);
                    for item in batch {
                        outcomes.push(BatchOutcome {
                            item,
                            result: Err(ScrapeError::BrowserLifecycle(e.to_string())),
                        });
                    }
                    continue;
                }
            };

            for (i, item) in batch.into_iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(self.config.inter_item_delay()).await;
                }

                let result = op(Arc::clone(&browser), item.clone()).await;
                outcomes.push(BatchOutcome { item, result });
            }

            // Guaranteed release: the instance never survives its batch.
            match Arc::try_unwrap(browser) {
                Ok(browser) => self.factory.close(browser).await,
                Err(_) => tracing::warn!("Browser still referenced after batch; leaking instance"),
            }
        }

        outcomes
    }
}
