//! Job orchestration across towns, industries, and provider lookups.
//!
//! This module provides the `ScrapingOrchestrator` which turns a job spec
//! into work units, drives them through batched browser instances, routes
//! failures into the durable retry queue, resolves phone providers through
//! the cache, and reports progress over the event bus. It has no knowledge
//! of its consumers; event emission is the sole coupling point.

use crate::batch::{BatchOutcome, BrowserBatchManager, BrowserFactory};
use crate::error::{Result, ScrapeError};
use crate::events::{
    AbandonedItem, CompletePayload, EventBus, ProgressPayload, ScrapeEvent, UnitErrorPayload,
};
use crate::extract::IndustryScraper;
use crate::lookup::ProviderLookup;
use chrono::Utc;
use leadscout_browser::NavigationManager;
use leadscout_core::{
    AppConfig, BusinessRecord, JobSpec, JobStatus, ScrapeStats, SessionId, WorkUnit,
};
use leadscout_db::{
    provider_cache, retry_queue, scrape_jobs, Database, ProviderCacheEntry, RetryItem,
    RetryItemType, RetryPolicy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Longest sleep between retry-queue polls; caps the backoff wait so a
/// `stop()` is never more than this far from being observed while idle.
const DRAIN_POLL_CAP: Duration = Duration::from_secs(30);

/// Live counters for one run, shared with the batch ops so progress
/// events fire as units resolve rather than in bursts between passes.
struct ProgressTracker {
    session_id: String,
    units_total: u32,
    units_done: AtomicU32,
    businesses_found: AtomicU32,
}

impl ProgressTracker {
    fn new(session_id: &str, units_total: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            units_total,
            units_done: AtomicU32::new(0),
            businesses_found: AtomicU32::new(0),
        }
    }

    fn unit_resolved(&self, events: &EventBus, unit: &WorkUnit, found: u32) {
        let units_done = self.units_done.fetch_add(1, Ordering::SeqCst) + 1;
        let businesses_found = self.businesses_found.fetch_add(found, Ordering::SeqCst) + found;
        events.emit(ScrapeEvent::Progress(ProgressPayload {
            session_id: self.session_id.clone(),
            units_done,
            units_total: self.units_total,
            businesses_found,
            town: unit.town.clone(),
            industry: unit.industry.clone(),
            timestamp: Utc::now(),
        }));
    }

    fn unit_abandoned(&self) {
        self.units_done.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a finished job reports back to the caller.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Session identifier of the job
    pub session_id: SessionId,
    /// Terminal status the job ended in
    pub status: JobStatus,
    /// Accumulated business records, providers attached where resolved
    pub records: Vec<BusinessRecord>,
    /// Attempted / succeeded / abandoned counters
    pub stats: ScrapeStats,
    /// Retry items given up on after exhausting their attempts
    pub abandoned: Vec<AbandonedItem>,
}

/// Coordinates scraping jobs end to end.
pub struct ScrapingOrchestrator<F: BrowserFactory> {
    config: AppConfig,
    db: Arc<Database>,
    events: EventBus,
    batches: BrowserBatchManager<F>,
    scraper: IndustryScraper,
    lookup: ProviderLookup,
    /// Shared so adaptive-timeout state spans the whole job; reset per run.
    nav: Mutex<NavigationManager>,
    /// Token of the run in flight, replaced at each `run()`.
    cancel: Mutex<CancellationToken>,
    /// Result sets by session, for the export stage's read accessor.
    results: Mutex<HashMap<String, Vec<BusinessRecord>>>,
}

impl<F: BrowserFactory> ScrapingOrchestrator<F> {
    /// Create an orchestrator over the given factory, database, and config.
    #[must_use]
    pub fn new(config: AppConfig, factory: F, db: Arc<Database>) -> Self {
        let nav = NavigationManager::new(config.navigation.clone());
        let batches = BrowserBatchManager::new(factory, config.batch.clone());
        let scraper = IndustryScraper::new(
            config.targets.listings_base_url.clone(),
            crate::extract::ListingSelectors::default(),
        );
        let lookup = ProviderLookup::new(
            config.targets.lookup_base_url.clone(),
            crate::lookup::LookupSelectors::default(),
        );
        Self {
            config,
            db,
            events: EventBus::default(),
            batches,
            scraper,
            lookup,
            nav: Mutex::new(nav),
            cancel: Mutex::new(CancellationToken::new()),
            results: Mutex::new(HashMap::new()),
        }
    }

    /// The event bus; subscribe before `run()` to observe the whole job.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Accumulated records for a finished session, if any.
    pub async fn results(&self, session_id: &SessionId) -> Option<Vec<BusinessRecord>> {
        self.results.lock().await.get(session_id.as_str()).cloned()
    }

    /// Request cooperative cancellation of the run in flight.
    ///
    /// Honored at the next batch boundary; the open browser finishes its
    /// batch first so the target never sees a half-torn-down session.
    pub async fn stop(&self) {
        tracing::info!("Stop requested");
        self.cancel.lock().await.cancel();
    }

    /// Run a job to completion and return its report.
    ///
    /// Per-unit failures never abort the job; they cycle through the retry
    /// queue until they succeed or exhaust their attempts. Only a first
    /// pass in which every single unit dies of a browser-launch failure
    /// escalates to `Failed`.
    pub async fn run(&self, spec: JobSpec) -> Result<JobReport> {
        let spec = spec
            .normalized()
            .map_err(|e| ScrapeError::InvalidJob(e.to_string()))?;

        let session_id = SessionId::generate();
        let sid = session_id.as_str().to_string();
        let units = spec.work_units();
        let mut stats = ScrapeStats {
            units_total: units.len() as u32,
            ..ScrapeStats::default()
        };

        scrape_jobs::create_job(self.db.pool(), &sid, &spec, stats.units_total).await?;
        scrape_jobs::update_status(self.db.pool(), &sid, JobStatus::Running).await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();
        self.nav.lock().await.reset();

        // Opportunistic cache sweep at the session boundary; stale entries
        // are advisory, so a failed sweep never blocks the job.
        if let Err(err) =
            provider_cache::cleanup(self.db.pool(), self.config.cache.max_age_days).await
        {
            tracing::warn!("Provider cache sweep failed: {}", err);
        }

        self.events.log(
            &sid,
            format!(
                "Job started: {} town(s) x {} industry(ies) = {} unit(s)",
                spec.towns.len(),
                spec.industries.len(),
                stats.units_total
            ),
        );

        let policy = RetryPolicy::from_config(&self.config.retry);
        let tracker = ProgressTracker::new(&sid, stats.units_total);
        let mut records: Vec<BusinessRecord> = Vec::new();
        let mut abandoned: Vec<AbandonedItem> = Vec::new();
        let mut resolved: Vec<ProviderCacheEntry> = Vec::new();

        // First pass over the cross-product.
        let outcomes = self.scrape_units(units, &cancel, &tracker).await;
        let all_launch_failures = !outcomes.is_empty()
            && outcomes
                .iter()
                .all(|o| matches!(o.result, Err(ScrapeError::BrowserLifecycle(_))));

        if all_launch_failures {
            let message = "no browser could be launched for any unit";
            tracing::error!("{}", message);
            scrape_jobs::finish_job(
                self.db.pool(),
                &sid,
                JobStatus::Failed,
                &stats,
                Some(message),
            )
            .await?;
            return Ok(self
                .finish(session_id, JobStatus::Failed, records, stats, abandoned)
                .await);
        }

        self.absorb_unit_outcomes(
            &sid,
            &policy,
            outcomes,
            &tracker,
            &mut stats,
            &mut records,
            &mut abandoned,
        )
        .await?;

        // Retry passes for failed units.
        self.drain_retries(
            &sid,
            &cancel,
            &policy,
            &tracker,
            &mut stats,
            &mut records,
            &mut abandoned,
            &mut resolved,
        )
        .await?;

        // Provider resolution phase.
        if spec.do_provider_lookup && !cancel.is_cancelled() {
            self.resolve_providers(
                &sid,
                &cancel,
                &policy,
                &tracker,
                &records,
                &mut stats,
                &mut resolved,
                &mut abandoned,
            )
            .await?;
            // Lookup failures just entered the queue; drain those too.
            self.drain_retries(
                &sid,
                &cancel,
                &policy,
                &tracker,
                &mut stats,
                &mut records,
                &mut abandoned,
                &mut resolved,
            )
            .await?;

            let written = provider_cache::put_many(self.db.pool(), &resolved).await?;
            if written > 0 {
                self.events
                    .log(&sid, format!("Cached {written} provider lookup(s)"));
            }
            attach_providers(&mut records, &resolved);
        }

        let status = if cancel.is_cancelled() {
            JobStatus::Stopped
        } else {
            JobStatus::Completed
        };
        scrape_jobs::finish_job(self.db.pool(), &sid, status, &stats, None).await?;

        Ok(self
            .finish(session_id, status, records, stats, abandoned)
            .await)
    }

    /// Store the result set, emit the `complete` event, build the report.
    async fn finish(
        &self,
        session_id: SessionId,
        status: JobStatus,
        records: Vec<BusinessRecord>,
        stats: ScrapeStats,
        abandoned: Vec<AbandonedItem>,
    ) -> JobReport {
        self.results
            .lock()
            .await
            .insert(session_id.as_str().to_string(), records.clone());

        self.events.emit(ScrapeEvent::Complete(CompletePayload {
            session_id: session_id.as_str().to_string(),
            status,
            stats,
            abandoned: abandoned.clone(),
            timestamp: Utc::now(),
        }));
        tracing::info!(
            session_id = session_id.as_str(),
            %status,
            succeeded = stats.units_succeeded,
            abandoned = stats.units_abandoned,
            businesses = stats.businesses_found,
            "Job finished"
        );

        JobReport {
            session_id,
            status,
            records,
            stats,
            abandoned,
        }
    }

    /// Run one set of work units through batched browsers, reporting each
    /// success on the event bus as it lands.
    async fn scrape_units(
        &self,
        units: Vec<WorkUnit>,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
    ) -> Vec<BatchOutcome<WorkUnit, Vec<BusinessRecord>>> {
        self.batches
            .run_batches(units, cancel, |browser, unit| async move {
                let navigator = self.batches.factory().navigator(&browser).await?;
                let mut nav = self.nav.lock().await;
                let found = self
                    .scraper
                    .scrape(&navigator, &mut nav, &unit.town, &unit.industry)
                    .await?;
                tracker.unit_resolved(&self.events, &unit, found.len() as u32);
                Ok(found)
            })
            .await
    }

    /// Fold unit outcomes into stats and records; failures enter the queue.
    ///
    /// A failure whose enqueue already exhausts the attempt budget is
    /// abandoned on the spot rather than left to wait out a backoff slot
    /// it can never use.
    #[allow(clippy::too_many_arguments)]
    async fn absorb_unit_outcomes(
        &self,
        sid: &str,
        policy: &RetryPolicy,
        outcomes: Vec<BatchOutcome<WorkUnit, Vec<BusinessRecord>>>,
        tracker: &ProgressTracker,
        stats: &mut ScrapeStats,
        records: &mut Vec<BusinessRecord>,
        abandoned: &mut Vec<AbandonedItem>,
    ) -> Result<()> {
        for outcome in outcomes {
            let unit = outcome.item;
            match outcome.result {
                Ok(found) => {
                    stats.units_succeeded += 1;
                    stats.businesses_found += found.len() as u32;
                    records.extend(found);
                }
                Err(e) if e.is_retryable() => {
                    let item = retry_queue::enqueue(
                        self.db.pool(),
                        policy,
                        sid,
                        RetryItemType::WorkUnit,
                        &unit.key(),
                        serde_json::to_value(&unit).map_err(leadscout_db::DatabaseError::from)?,
                        &e.to_string(),
                    )
                    .await?;
                    let exhausted = item.is_exhausted(policy);
                    self.emit_unit_error(sid, &unit.key(), &e, !exhausted);
                    if exhausted {
                        self.abandon_item(sid, &item, tracker, stats, abandoned).await?;
                    }
                }
                Err(e) => {
                    // A non-retryable failure never enters the queue; it
                    // still has to show up in the abandoned counters.
                    self.emit_unit_error(sid, &unit.key(), &e, false);
                    self.record_abandoned(
                        sid,
                        RetryItemType::WorkUnit,
                        &unit.key(),
                        1,
                        Some(e.to_string()),
                        tracker,
                        stats,
                        abandoned,
                    );
                }
            }
        }
        Ok(())
    }

    /// Loop over the retry queue until nothing for this session remains
    /// pending, sleeping until the next item's backoff elapses.
    #[allow(clippy::too_many_arguments)]
    async fn drain_retries(
        &self,
        sid: &str,
        cancel: &CancellationToken,
        policy: &RetryPolicy,
        tracker: &ProgressTracker,
        stats: &mut ScrapeStats,
        records: &mut Vec<BusinessRecord>,
        abandoned: &mut Vec<AbandonedItem>,
        resolved: &mut Vec<ProviderCacheEntry>,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                tracing::info!("Cancellation observed between retry passes");
                return Ok(());
            }
            if retry_queue::pending_count(self.db.pool(), sid).await? == 0 {
                return Ok(());
            }

            let ready = retry_queue::dequeue_ready(self.db.pool(), sid).await?;
            if ready.is_empty() {
                let wait = match retry_queue::next_ready_at(self.db.pool(), sid).await? {
                    Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                    None => return Ok(()),
                };
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(wait.min(DRAIN_POLL_CAP)) => {}
                }
                continue;
            }

            let mut unit_items: Vec<(RetryItem, WorkUnit)> = Vec::new();
            let mut lookup_items: Vec<(RetryItem, String)> = Vec::new();

            for item in ready {
                if item.is_exhausted(policy) {
                    self.abandon_item(sid, &item, tracker, stats, abandoned).await?;
                    continue;
                }
                match item.item_type {
                    RetryItemType::WorkUnit => {
                        match serde_json::from_value::<WorkUnit>(item.payload.clone()) {
                            Ok(unit) => unit_items.push((item, unit)),
                            Err(e) => {
                                // Unreadable payload can never succeed.
                                tracing::error!(
                                    "Dropping retry item {} with bad payload: {}",
                                    item.item_key,
                                    e
                                );
                                self.abandon_item(sid, &item, tracker, stats, abandoned).await?;
                            }
                        }
                    }
                    RetryItemType::ProviderLookup => {
                        let phone = item.payload.as_str().map(str::to_string);
                        match phone {
                            Some(phone) => lookup_items.push((item, phone)),
                            None => {
                                tracing::error!(
                                    "Dropping lookup retry {} with non-string payload",
                                    item.item_key
                                );
                                self.abandon_item(sid, &item, tracker, stats, abandoned).await?;
                            }
                        }
                    }
                }
            }

            self.retry_units(
                sid, cancel, policy, tracker, unit_items, stats, records, abandoned,
            )
            .await?;
            self.retry_lookups(
                sid, cancel, policy, tracker, lookup_items, stats, resolved, abandoned,
            )
            .await?;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn retry_units(
        &self,
        sid: &str,
        cancel: &CancellationToken,
        policy: &RetryPolicy,
        tracker: &ProgressTracker,
        items: Vec<(RetryItem, WorkUnit)>,
        stats: &mut ScrapeStats,
        records: &mut Vec<BusinessRecord>,
        abandoned: &mut Vec<AbandonedItem>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut by_key: HashMap<String, RetryItem> = items
            .iter()
            .map(|(item, _)| (item.item_key.clone(), item.clone()))
            .collect();
        let units: Vec<WorkUnit> = items.into_iter().map(|(_, unit)| unit).collect();

        let outcomes = self.scrape_units(units, cancel, tracker).await;
        for outcome in outcomes {
            let unit = outcome.item;
            let Some(item) = by_key.remove(&unit.key()) else {
                continue;
            };
            match outcome.result {
                Ok(found) => {
                    retry_queue::ack(self.db.pool(), &item.id).await?;
                    stats.units_succeeded += 1;
                    stats.businesses_found += found.len() as u32;
                    records.extend(found);
                }
                Err(e) => {
                    let updated = retry_queue::enqueue(
                        self.db.pool(),
                        policy,
                        sid,
                        RetryItemType::WorkUnit,
                        &item.item_key,
                        item.payload,
                        &e.to_string(),
                    )
                    .await?;
                    let exhausted = updated.is_exhausted(policy);
                    self.emit_unit_error(sid, &item.item_key, &e, !exhausted);
                    if exhausted {
                        self.abandon_item(sid, &updated, tracker, stats, abandoned)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn retry_lookups(
        &self,
        sid: &str,
        cancel: &CancellationToken,
        policy: &RetryPolicy,
        tracker: &ProgressTracker,
        items: Vec<(RetryItem, String)>,
        stats: &mut ScrapeStats,
        resolved: &mut Vec<ProviderCacheEntry>,
        abandoned: &mut Vec<AbandonedItem>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut by_key: HashMap<String, RetryItem> = items
            .iter()
            .map(|(item, _)| (item.item_key.clone(), item.clone()))
            .collect();
        let phones: Vec<String> = items.into_iter().map(|(_, phone)| phone).collect();

        let outcomes = self.lookup_phones(phones, cancel).await;
        for outcome in outcomes {
            let phone = outcome.item;
            let Some(item) = by_key.remove(&phone) else {
                continue;
            };
            match outcome.result {
                Ok(entry) => {
                    retry_queue::ack(self.db.pool(), &item.id).await?;
                    stats.live_lookups += 1;
                    resolved.push(entry);
                }
                Err(e) => {
                    let updated = retry_queue::enqueue(
                        self.db.pool(),
                        policy,
                        sid,
                        RetryItemType::ProviderLookup,
                        &item.item_key,
                        item.payload,
                        &e.to_string(),
                    )
                    .await?;
                    let exhausted = updated.is_exhausted(policy);
                    self.emit_unit_error(sid, &item.item_key, &e, !exhausted);
                    if exhausted {
                        self.abandon_item(sid, &updated, tracker, stats, abandoned)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve the distinct phone numbers across `records`, from cache
    /// where possible, live otherwise.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_providers(
        &self,
        sid: &str,
        cancel: &CancellationToken,
        policy: &RetryPolicy,
        tracker: &ProgressTracker,
        records: &[BusinessRecord],
        stats: &mut ScrapeStats,
        resolved: &mut Vec<ProviderCacheEntry>,
        abandoned: &mut Vec<AbandonedItem>,
    ) -> Result<()> {
        let mut distinct: Vec<String> = Vec::new();
        for record in records {
            if let Some(normalized) = record.phone.as_deref().and_then(leadscout_db::normalize_phone)
            {
                if !distinct.contains(&normalized) {
                    distinct.push(normalized);
                }
            }
        }
        if distinct.is_empty() {
            return Ok(());
        }
        self.events.log(
            sid,
            format!("Resolving providers for {} phone number(s)", distinct.len()),
        );

        let mut misses: Vec<String> = Vec::new();
        for phone in distinct {
            match provider_cache::get(self.db.pool(), &phone).await? {
                Some(entry) => {
                    stats.cache_hits += 1;
                    resolved.push(entry);
                }
                None => misses.push(phone),
            }
        }

        let outcomes = self.lookup_phones(misses, cancel).await;
        for outcome in outcomes {
            let phone = outcome.item;
            match outcome.result {
                Ok(entry) => {
                    stats.live_lookups += 1;
                    resolved.push(entry);
                }
                Err(e) if e.is_retryable() => {
                    let item = retry_queue::enqueue(
                        self.db.pool(),
                        policy,
                        sid,
                        RetryItemType::ProviderLookup,
                        &phone,
                        serde_json::Value::String(phone.clone()),
                        &e.to_string(),
                    )
                    .await?;
                    let exhausted = item.is_exhausted(policy);
                    self.emit_unit_error(sid, &phone, &e, !exhausted);
                    if exhausted {
                        self.abandon_item(sid, &item, tracker, stats, abandoned).await?;
                    }
                }
                Err(e) => {
                    self.emit_unit_error(sid, &phone, &e, false);
                    self.record_abandoned(
                        sid,
                        RetryItemType::ProviderLookup,
                        &phone,
                        1,
                        Some(e.to_string()),
                        tracker,
                        stats,
                        abandoned,
                    );
                }
            }
        }
        Ok(())
    }

    /// Run live lookups through the same batched-browser machinery as
    /// scraping, so the 5-per-browser cap holds for the lookup target too.
    async fn lookup_phones(
        &self,
        phones: Vec<String>,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome<String, ProviderCacheEntry>> {
        self.batches
            .run_batches(phones, cancel, |browser, phone| async move {
                let navigator = self.batches.factory().navigator(&browser).await?;
                let mut nav = self.nav.lock().await;
                self.lookup.lookup(&navigator, &mut nav, &phone).await
            })
            .await
    }

    async fn abandon_item(
        &self,
        sid: &str,
        item: &RetryItem,
        tracker: &ProgressTracker,
        stats: &mut ScrapeStats,
        abandoned: &mut Vec<AbandonedItem>,
    ) -> Result<()> {
        retry_queue::abandon(self.db.pool(), item).await?;
        self.record_abandoned(
            sid,
            item.item_type,
            &item.item_key,
            item.attempts,
            item.last_error.clone(),
            tracker,
            stats,
            abandoned,
        );
        Ok(())
    }

    /// Surface a terminally failed item in the counters and the report.
    ///
    /// Also covers failures that never enter the queue, so `units_total`
    /// always equals succeeded plus abandoned at the end of a job.
    #[allow(clippy::too_many_arguments)]
    fn record_abandoned(
        &self,
        sid: &str,
        item_type: RetryItemType,
        item_key: &str,
        attempts: u32,
        last_error: Option<String>,
        tracker: &ProgressTracker,
        stats: &mut ScrapeStats,
        abandoned: &mut Vec<AbandonedItem>,
    ) {
        match item_type {
            RetryItemType::WorkUnit => {
                stats.units_abandoned += 1;
                tracker.unit_abandoned();
            }
            RetryItemType::ProviderLookup => stats.lookups_abandoned += 1,
        }
        abandoned.push(AbandonedItem {
            item_type: item_type.to_string(),
            item_key: item_key.to_string(),
            attempts,
            last_error,
        });
        self.events.log(
            sid,
            format!("Abandoned {item_type} '{item_key}' after {attempts} attempt(s)"),
        );
    }

    fn emit_unit_error(&self, sid: &str, item_key: &str, error: &ScrapeError, will_retry: bool) {
        tracing::warn!(item_key, will_retry, "Unit failed: {}", error);
        self.events.emit(ScrapeEvent::Error(UnitErrorPayload {
            session_id: sid.to_string(),
            item_key: item_key.to_string(),
            error: error.to_string(),
            will_retry,
            timestamp: Utc::now(),
        }));
    }
}

/// Annotate records with providers from the resolved entry set.
fn attach_providers(records: &mut [BusinessRecord], resolved: &[ProviderCacheEntry]) {
    let by_phone: HashMap<&str, &str> = resolved
        .iter()
        .map(|entry| (entry.phone_number.as_str(), entry.provider.as_str()))
        .collect();

    for record in records {
        if record.provider.is_some() {
            continue;
        }
        let Some(normalized) = record.phone.as_deref().and_then(leadscout_db::normalize_phone)
        else {
            continue;
        };
        if let Some(provider) = by_phone.get(normalized.as_str()) {
            record.provider = Some((*provider).to_string());
        }
    }
}
