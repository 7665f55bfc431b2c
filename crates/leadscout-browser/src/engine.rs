use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use tokio::task::JoinHandle;

/// One headless browser instance.
///
/// Launch configuration comes in explicitly (no process-global state); the
/// batch manager launches a fresh engine per batch and closes it
/// unconditionally once the batch is done.
pub struct BrowserEngine {
    browser: Browser,
    handler_task: JoinHandle<()>,
    fingerprint: FingerprintConfig,
}

impl BrowserEngine {
    /// Launch a browser with a freshly randomized fingerprint.
    pub async fn launch(config: &leadscout_core::BrowserConfig) -> Result<Self> {
        Self::launch_with_fingerprint(config, FingerprintConfig::randomized()).await
    }

    /// Launch a browser with a specific fingerprint.
    pub async fn launch_with_fingerprint(
        config: &leadscout_core::BrowserConfig,
        fingerprint: FingerprintConfig,
    ) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .args(fingerprint.launch_args());

        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !config.extra_args.is_empty() {
            builder = builder.args(config.extra_args.clone());
        }

        let browser_config = builder
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // Drive the CDP message loop for the lifetime of the browser.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        tracing::debug!(
            "Browser launched (headless: {}, viewport: {}x{})",
            config.headless,
            fingerprint.viewport_width,
            fingerprint.viewport_height
        );

        Ok(Self {
            browser,
            handler_task,
            fingerprint,
        })
    }

    /// Open a new page with the engine's fingerprint applied.
    pub async fn new_page(&self) -> Result<Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        page.set_user_agent(self.fingerprint.user_agent.as_str())
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        Ok(page)
    }

    /// Fingerprint this instance was launched with.
    #[must_use]
    pub fn fingerprint(&self) -> &FingerprintConfig {
        &self.fingerprint
    }

    /// Close the browser and stop the handler loop.
    ///
    /// Must be called after every batch even on error paths, so a flagged
    /// or half-challenged browser session never leaks into the next batch.
    pub async fn close(mut self) -> Result<()> {
        let close_result = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();

        close_result.map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        tracing::debug!("Browser closed");
        Ok(())
    }
}
