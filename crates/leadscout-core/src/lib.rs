//! Leadscout Core - Foundation crate for the Leadscout scraping pipeline.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other Leadscout crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`SessionId`, `JobSpec`, `BusinessRecord`)
//!
//! # Example
//!
//! ```rust
//! use leadscout_core::{AppConfig, JobSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let spec = JobSpec {
//!     towns: vec!["Alpha".to_string()],
//!     industries: vec!["Pharmacy".to_string()],
//!     do_provider_lookup: true,
//!     concurrency: None,
//! }
//! .normalized()?;
//!
//! assert_eq!(spec.work_units().len(), 1);
//! assert_eq!(config.batch.max_ops_per_browser, 5);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BatchConfig, BrowserConfig, CacheConfig, GeneralConfig, NavigationConfig,
    RetryConfig, TargetConfig,
};
pub use error::{ConfigError, ConfigResult, LeadscoutError, Result};
pub use types::{BusinessRecord, JobSpec, JobStatus, ScrapeStats, SessionId, WorkUnit};
