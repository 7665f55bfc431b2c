//! Configuration management for Leadscout.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/leadscout/config.toml` (or platform
/// equivalent). If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General application settings
    pub general: GeneralConfig,
    /// Browser launch settings
    pub browser: BrowserConfig,
    /// Navigation retry and timeout settings
    pub navigation: NavigationConfig,
    /// Browser batch rotation settings
    pub batch: BatchConfig,
    /// Durable retry queue settings
    pub retry: RetryConfig,
    /// Provider lookup cache settings
    pub cache: CacheConfig,
    /// Scrape target endpoints
    pub targets: TargetConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `LEADSCOUT_HEADLESS`: Override browser headless mode (true/false)
    /// - `LEADSCOUT_MAX_OPS_PER_BROWSER`: Override the per-browser operation cap
    /// - `LEADSCOUT_CONCURRENCY`: Override batch concurrency
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;

        if let Ok(val) = std::env::var("LEADSCOUT_HEADLESS") {
            if let Ok(headless) = val.parse() {
                config.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("LEADSCOUT_MAX_OPS_PER_BROWSER") {
            if let Ok(cap) = val.parse() {
                config.batch.max_ops_per_browser = cap;
                tracing::debug!("Override batch.max_ops_per_browser from env: {}", cap);
            }
        }

        if let Ok(val) = std::env::var("LEADSCOUT_CONCURRENCY") {
            if let Ok(concurrency) = val.parse() {
                config.batch.concurrency = concurrency;
                tracing::debug!("Override batch.concurrency from env: {}", concurrency);
            }
        }

        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/leadscout/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "leadscout", "leadscout").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/leadscout`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "leadscout", "leadscout").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Validate configuration values that have hard constraints.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for out-of-range values.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.max_ops_per_browser == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.max_ops_per_browser".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.navigation.min_timeout_ms > self.navigation.max_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "navigation.min_timeout_ms".to_string(),
                reason: "must not exceed navigation.max_timeout_ms".to_string(),
            });
        }
        if self.navigation.initial_timeout_ms < self.navigation.min_timeout_ms
            || self.navigation.initial_timeout_ms > self.navigation.max_timeout_ms
        {
            return Err(ConfigError::InvalidValue {
                field: "navigation.initial_timeout_ms".to_string(),
                reason: "must lie within [min_timeout_ms, max_timeout_ms]".to_string(),
            });
        }
        if self.navigation.sample_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "navigation.sample_window".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Path to the SQLite database file (defaults to the XDG data dir)
    pub database_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: None,
        }
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run the browser headless
    pub headless: bool,
    /// Explicit Chrome/Chromium executable path (auto-detected when absent)
    pub executable_path: Option<PathBuf>,
    /// Extra launch arguments appended to the default set
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Navigation retry and adaptive timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Retry attempts per wait strategy
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts, in milliseconds
    pub base_delay_ms: u64,
    /// Starting navigation timeout, in milliseconds
    pub initial_timeout_ms: u64,
    /// Lower clamp for the adaptive timeout, in milliseconds
    pub min_timeout_ms: u64,
    /// Upper clamp for the adaptive timeout, in milliseconds
    pub max_timeout_ms: u64,
    /// Number of recent navigation durations kept for timeout adaptation
    pub sample_window: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 3_000,
            initial_timeout_ms: 60_000,
            min_timeout_ms: 15_000,
            max_timeout_ms: 120_000,
            sample_window: 10,
        }
    }
}

impl NavigationConfig {
    /// Base backoff delay as a `Duration`.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Initial timeout as a `Duration`.
    #[must_use]
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    /// Minimum timeout as a `Duration`.
    #[must_use]
    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    /// Maximum timeout as a `Duration`.
    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

/// Browser batch rotation settings.
///
/// The per-browser cap exists because the listings target starts serving
/// bot challenges after too many sequential operations from one browser
/// session. The threshold is an empirical heuristic and may drift, so it
/// stays configurable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum operations one browser instance performs before rotation
    pub max_ops_per_browser: usize,
    /// Delay between items within a batch, in milliseconds
    pub inter_item_delay_ms: u64,
    /// Number of batches allowed to run as independent tasks
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_ops_per_browser: 5,
            inter_item_delay_ms: 500,
            concurrency: 1,
        }
    }
}

impl BatchConfig {
    /// Inter-item delay as a `Duration`.
    #[must_use]
    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

/// Durable retry queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts before an item is abandoned
    pub max_attempts: u32,
    /// Base delay for the item-level doubling backoff, in milliseconds
    pub base_delay_ms: u64,
    /// Cap on the backoff interval, in seconds
    pub max_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 3_000,
            max_interval_secs: 900,
        }
    }
}

/// Provider lookup cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are eligible for the cleanup sweep
    pub max_age_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_age_days: 30 }
    }
}

/// Scrape target endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the map/listings service
    pub listings_base_url: String,
    /// Base URL of the carrier-lookup service
    pub lookup_base_url: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            listings_base_url: "https://maps.example.com".to_string(),
            lookup_base_url: "https://carrier-lookup.example.com".to_string(),
        }
    }
}
