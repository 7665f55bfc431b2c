//! Browser automation engine for the Leadscout scraping pipeline.
//!
//! Provides headless browser control with anti-detection fingerprinting
//! and a resilient navigation layer (retry with exponential backoff,
//! wait-strategy fallback, adaptive timeouts).

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod navigation;

pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use navigation::{
    CdpNavigator, NavigationManager, NavigationOutcome, NavigationStats, PageNavigator,
    WaitStrategy,
};
