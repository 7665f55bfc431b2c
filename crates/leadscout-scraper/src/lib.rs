//! Leadscout Scraping Pipeline
//!
//! Coordinates multi-town, multi-industry scraping jobs: batched browser
//! dispatch with a per-instance operation cap, listings extraction with
//! selector fallback, carrier-provider resolution through the persistent
//! cache, durable retries, and progress events over a broadcast bus.
//!
//! The orchestrator is the entry point:
//!
//! ```ignore
//! use leadscout_scraper::{ChromiumFactory, ScrapingOrchestrator};
//!
//! let orchestrator = ScrapingOrchestrator::new(config.clone(), ChromiumFactory::new(config.browser), db);
//! let mut events = orchestrator.events().subscribe();
//! let report = orchestrator.run(spec).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod batch;
pub mod error;
pub mod events;
pub mod extract;
pub mod lookup;
pub mod orchestrator;

pub use batch::{BatchOutcome, BrowserBatchManager, BrowserFactory, ChromiumFactory};
pub use error::{Result, ScrapeError};
pub use events::{
    AbandonedItem, CompletePayload, EventBus, LogPayload, ProgressPayload, ScrapeEvent,
    UnitErrorPayload,
};
pub use extract::{IndustryScraper, ListingSelectors};
pub use lookup::{LookupSelectors, ProviderLookup};
pub use orchestrator::{JobReport, ScrapingOrchestrator};
