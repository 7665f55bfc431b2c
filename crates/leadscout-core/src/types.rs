//! Shared types used across the Leadscout pipeline.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling.

use crate::error::LeadscoutError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Newtype for scrape session identifiers with validation.
///
/// Session IDs must be valid UUIDs (v4 format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new `SessionId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadscoutError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `SessionId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that a string is a valid UUID v4.
    fn validate(id: &str) -> Result<(), LeadscoutError> {
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(LeadscoutError::Validation(format!(
                "invalid session ID: must be a valid UUID v4, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a scrape job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    /// Job accepted but not yet started
    Pending,
    /// Job is currently executing
    Running,
    /// All work units and retries resolved
    Completed,
    /// Cancelled by the user at a work-unit boundary
    Stopped,
    /// Unrecoverable setup error (e.g. no browser could be launched)
    Failed,
}

impl JobStatus {
    /// Whether the status is terminal (the job will never run again).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = LeadscoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            "Stopped" => Ok(Self::Stopped),
            "Failed" => Ok(Self::Failed),
            other => Err(LeadscoutError::Validation(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// A scrape job submission: which towns and industries to harvest, and
/// whether to resolve phone providers afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Towns to scrape, in submission order
    pub towns: Vec<String>,
    /// Industries to scrape, in submission order
    pub industries: Vec<String>,
    /// Resolve phone providers through the carrier-lookup target
    pub do_provider_lookup: bool,
    /// Optional batch-concurrency override
    pub concurrency: Option<usize>,
}

impl JobSpec {
    /// Validate the spec and return it with towns/industries deduplicated
    /// while preserving submission order.
    ///
    /// # Errors
    /// Returns `LeadscoutError::Validation` if either list is empty after
    /// trimming.
    pub fn normalized(mut self) -> Result<Self, LeadscoutError> {
        self.towns = dedup_preserving_order(self.towns);
        self.industries = dedup_preserving_order(self.industries);

        if self.towns.is_empty() {
            return Err(LeadscoutError::Validation("no towns selected".to_string()));
        }
        if self.industries.is_empty() {
            return Err(LeadscoutError::Validation(
                "no industries selected".to_string(),
            ));
        }
        Ok(self)
    }

    /// Cross-product of towns and industries, in order.
    #[must_use]
    pub fn work_units(&self) -> Vec<WorkUnit> {
        let mut units = Vec::with_capacity(self.towns.len() * self.industries.len());
        for town in &self.towns {
            for industry in &self.industries {
                units.push(WorkUnit {
                    town: town.clone(),
                    industry: industry.clone(),
                });
            }
        }
        units
    }
}

/// Drop duplicate entries (after trimming) while keeping first-seen order.
fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .collect()
}

/// One (town, industry) pair to scrape.
///
/// Ephemeral: generated from the job cross-product at start, consumed by
/// batch dispatch, persisted only if it fails and becomes a retry item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Town being scraped
    pub town: String,
    /// Industry being scraped
    pub industry: String,
}

impl WorkUnit {
    /// Stable key identifying this unit within a session.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}::{}", self.town.to_lowercase(), self.industry.to_lowercase())
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.town, self.industry)
    }
}

/// One scraped business entity.
///
/// Immutable once scraped except for the provider annotation, which is
/// attached after carrier lookup resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRecord {
    /// Business name
    pub name: String,
    /// Phone number as displayed on the listing, if present
    pub phone: Option<String>,
    /// Street address, if present
    pub address: Option<String>,
    /// Map link extracted from the result card, if present
    pub map_url: Option<String>,
    /// Town the record was scraped for
    pub town: String,
    /// Industry the record was scraped for
    pub industry: String,
    /// Telecom carrier, attached after lookup (None until resolved)
    pub provider: Option<String>,
}

/// Counters reported with job completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScrapeStats {
    /// Work units generated from the cross-product
    pub units_total: u32,
    /// Work units that eventually succeeded (first pass or retry)
    pub units_succeeded: u32,
    /// Work units abandoned after exhausting retry attempts
    pub units_abandoned: u32,
    /// Business records collected
    pub businesses_found: u32,
    /// Provider lookups answered from the cache
    pub cache_hits: u32,
    /// Provider lookups performed live
    pub live_lookups: u32,
    /// Lookups abandoned after exhausting retry attempts
    pub lookups_abandoned: u32,
}
