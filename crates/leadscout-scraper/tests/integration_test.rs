//! End-to-end orchestrator tests over scripted browser fakes.
//!
//! No Chrome involved: the factory hands out navigators that serve static
//! HTML, so the full pipeline (batching, navigation retries, the durable
//! retry queue, the provider cache and event emission) is exercised
//! deterministically.

use async_trait::async_trait;
use leadscout_browser::{BrowserError, PageNavigator, WaitStrategy};
use leadscout_core::{AppConfig, JobSpec, JobStatus};
use leadscout_db::{provider_cache, retry_queue, scrape_jobs, Database, ProviderCacheEntry};
use leadscout_scraper::{BrowserFactory, ScrapeError, ScrapeEvent, ScrapingOrchestrator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

const LISTINGS_HTML: &str = r#"
    <div class="results">
        <div class="result-card">
            <div class="business-name">Alpha Pharmacy</div>
            <a href="tel:(555) 010-0001" class="phone">Call</a>
            <div class="address">1 Main St</div>
            <a href="https://maps.google.com/maps/place/alpha">Map</a>
        </div>
        <div class="result-card">
            <div class="business-name">Beta Drugs</div>
            <div class="phone">555-010-0002</div>
            <div class="address">2 Side St</div>
        </div>
        <div class="result-card">
            <div class="business-name">Gamma Apothecary</div>
            <div class="address">3 Back St</div>
        </div>
    </div>
"#;

/// Scripted page source shared by every navigator the factory hands out.
struct PageServer {
    listings_html: String,
    lookup_html: HashMap<String, String>,
    /// Number of upcoming `goto` calls that fail with a timeout.
    goto_failures: AtomicU32,
    /// `goto` calls beyond this budget block until [`PageServer::gate`]
    /// receives permits. `u32::MAX` means unlimited.
    free_gotos: AtomicU32,
    gate: Semaphore,
    /// Every URL navigated to, in order.
    visited: Mutex<Vec<String>>,
}

impl PageServer {
    fn new() -> Self {
        let mut lookup_html = HashMap::new();
        lookup_html.insert(
            "5550100002".to_string(),
            r#"<span class="carrier-name">T-Mobile</span><span class="confidence">90%</span>"#
                .to_string(),
        );
        Self {
            listings_html: LISTINGS_HTML.to_string(),
            lookup_html,
            goto_failures: AtomicU32::new(0),
            free_gotos: AtomicU32::new(u32::MAX),
            gate: Semaphore::new(0),
            visited: Mutex::new(Vec::new()),
        }
    }

    fn take_failure(&self) -> bool {
        if self.goto_failures.load(Ordering::SeqCst) > 0 {
            self.goto_failures.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn take_goto_slot(&self) -> bool {
        self.free_gotos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn visited_lookup_urls(&self) -> usize {
        self.visited
            .lock()
            .expect("visited lock")
            .iter()
            .filter(|url| url.contains("lookup.test"))
            .count()
    }
}

struct FakeNavigator {
    server: Arc<PageServer>,
    current_url: Mutex<Option<String>>,
}

#[async_trait]
impl PageNavigator for FakeNavigator {
    async fn goto(
        &self,
        url: &str,
        _strategy: WaitStrategy,
        timeout: Duration,
    ) -> leadscout_browser::Result<()> {
        if !self.server.take_goto_slot() {
            let permit = self.server.gate.acquire().await.expect("gate open");
            permit.forget();
        }
        if self.server.take_failure() {
            return Err(BrowserError::Timeout(timeout));
        }
        self.server
            .visited
            .lock()
            .expect("visited lock")
            .push(url.to_string());
        *self.current_url.lock().expect("url lock") = Some(url.to_string());
        Ok(())
    }

    async fn content(&self) -> leadscout_browser::Result<String> {
        let url = self
            .current_url
            .lock()
            .expect("url lock")
            .clone()
            .unwrap_or_default();
        if url.contains("lookup.test") {
            let number = url
                .split("number=")
                .nth(1)
                .unwrap_or_default()
                .split('&')
                .next()
                .unwrap_or_default();
            Ok(self
                .server
                .lookup_html
                .get(number)
                .cloned()
                .unwrap_or_else(|| "<div>no match</div>".to_string()))
        } else {
            Ok(self.server.listings_html.clone())
        }
    }
}

struct FakeFactory {
    server: Arc<PageServer>,
    fail_launch: bool,
}

#[async_trait]
impl BrowserFactory for FakeFactory {
    type Browser = ();
    type Navigator = FakeNavigator;

    async fn launch(&self) -> leadscout_scraper::Result<()> {
        if self.fail_launch {
            return Err(ScrapeError::BrowserLifecycle(
                "no chrome binary".to_string(),
            ));
        }
        Ok(())
    }

    async fn navigator(&self, _browser: &()) -> leadscout_scraper::Result<FakeNavigator> {
        Ok(FakeNavigator {
            server: Arc::clone(&self.server),
            current_url: Mutex::new(None),
        })
    }

    async fn close(&self, _browser: ()) {}
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.navigation.max_retries = 1;
    config.navigation.base_delay_ms = 1;
    config.batch.max_ops_per_browser = 5;
    config.batch.inter_item_delay_ms = 1;
    config.retry.max_attempts = 2;
    config.retry.base_delay_ms = 1;
    config.targets.listings_base_url = "https://listings.test/search".to_string();
    config.targets.lookup_base_url = "https://lookup.test/carrier".to_string();
    config
}

async fn test_db(dir: &tempfile::TempDir) -> Arc<Database> {
    let db = Database::new(dir.path().join("leadscout.db"))
        .await
        .expect("create database");
    db.run_migrations().await.expect("run migrations");
    Arc::new(db)
}

fn pharmacy_job(do_provider_lookup: bool) -> JobSpec {
    JobSpec {
        towns: vec!["Alpha".to_string()],
        industries: vec!["Pharmacy".to_string()],
        do_provider_lookup,
        concurrency: None,
    }
}

#[tokio::test]
async fn test_full_job_with_cached_and_live_lookups() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let server = Arc::new(PageServer::new());

    // One of the two phone numbers is already cached.
    provider_cache::put_many(
        db.pool(),
        &[ProviderCacheEntry::now("5550100001", "Verizon", 0.95)],
    )
    .await
    .expect("seed cache");

    let orchestrator = ScrapingOrchestrator::new(
        test_config(),
        FakeFactory {
            server: Arc::clone(&server),
            fail_launch: false,
        },
        db.clone(),
    );
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator.run(pharmacy_job(true)).await.expect("run job");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.records.len(), 3);
    assert_eq!(report.records.iter().filter(|r| r.phone.is_some()).count(), 2);

    let by_name: HashMap<&str, Option<&str>> = report
        .records
        .iter()
        .map(|r| (r.name.as_str(), r.provider.as_deref()))
        .collect();
    assert_eq!(by_name["Alpha Pharmacy"], Some("Verizon"));
    assert_eq!(by_name["Beta Drugs"], Some("T-Mobile"));
    assert_eq!(by_name["Gamma Apothecary"], None);

    assert_eq!(report.stats.units_total, 1);
    assert_eq!(report.stats.units_succeeded, 1);
    assert_eq!(report.stats.businesses_found, 3);
    assert_eq!(report.stats.cache_hits, 1);
    assert_eq!(report.stats.live_lookups, 1);
    assert_eq!(report.stats.units_abandoned, 0);
    assert!(report.abandoned.is_empty());

    // Exactly one live lookup went over the wire.
    assert_eq!(server.visited_lookup_urls(), 1);

    // Live result was written back to the cache.
    let cached = provider_cache::get(db.pool(), "5550100002")
        .await
        .expect("cache read")
        .expect("entry present");
    assert_eq!(cached.provider, "T-Mobile");

    // Result accessor returns the same records.
    let stored = orchestrator
        .results(&report.session_id)
        .await
        .expect("results stored");
    assert_eq!(stored.len(), 3);

    // Job row reached its terminal state.
    let job = scrape_jobs::get_job(db.pool(), report.session_id.as_str())
        .await
        .expect("job row");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.businesses_found, 3);

    // Events: at least one progress, and a final complete.
    let mut saw_progress = false;
    let mut complete_status = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ScrapeEvent::Progress(p) => {
                saw_progress = true;
                assert_eq!(p.units_total, 1);
            }
            ScrapeEvent::Complete(c) => complete_status = Some(c.status),
            _ => {}
        }
    }
    assert!(saw_progress);
    assert_eq!(complete_status, Some(JobStatus::Completed));
}

#[tokio::test]
async fn test_failed_unit_recovers_through_retry_queue() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let server = Arc::new(PageServer::new());
    // First navigation cycle fails every wait strategy once (4 calls),
    // converting the unit into a retry item; the retry pass then succeeds.
    server.goto_failures.store(4, Ordering::SeqCst);

    let orchestrator = ScrapingOrchestrator::new(
        test_config(),
        FakeFactory {
            server: Arc::clone(&server),
            fail_launch: false,
        },
        db.clone(),
    );
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator
        .run(pharmacy_job(false))
        .await
        .expect("run job");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.stats.units_succeeded, 1);
    assert_eq!(report.stats.units_abandoned, 0);
    assert_eq!(report.records.len(), 3);

    // Nothing left pending for this session.
    let pending = retry_queue::pending_count(db.pool(), report.session_id.as_str())
        .await
        .expect("pending count");
    assert_eq!(pending, 0);

    // The first-pass failure was surfaced as a retryable error event.
    let mut saw_retry_error = false;
    while let Ok(event) = events.try_recv() {
        if let ScrapeEvent::Error(e) = event {
            assert_eq!(e.item_key, "alpha::pharmacy");
            assert!(e.will_retry);
            saw_retry_error = true;
        }
    }
    assert!(saw_retry_error);
}

#[tokio::test]
async fn test_unit_abandoned_after_max_attempts() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let server = Arc::new(PageServer::new());
    // Navigation never succeeds.
    server.goto_failures.store(1_000_000, Ordering::SeqCst);

    let orchestrator = ScrapingOrchestrator::new(
        test_config(),
        FakeFactory {
            server: Arc::clone(&server),
            fail_launch: false,
        },
        db.clone(),
    );
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator
        .run(pharmacy_job(false))
        .await
        .expect("run job");

    // Exhausted retries do not fail the job; they are reported.
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.stats.units_succeeded, 0);
    assert_eq!(report.stats.units_abandoned, 1);
    assert!(report.records.is_empty());
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].item_key, "alpha::pharmacy");
    assert_eq!(report.abandoned[0].attempts, 2);

    let pending = retry_queue::pending_count(db.pool(), report.session_id.as_str())
        .await
        .expect("pending count");
    assert_eq!(pending, 0);

    // The completion event carries the abandoned item.
    let mut complete_abandoned = None;
    while let Ok(event) = events.try_recv() {
        if let ScrapeEvent::Complete(c) = event {
            complete_abandoned = Some(c.abandoned);
        }
    }
    assert_eq!(
        complete_abandoned.expect("complete event").len(),
        1
    );
}

#[tokio::test]
async fn test_exhausted_unit_is_abandoned_without_waiting_out_backoff() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let server = Arc::new(PageServer::new());
    // Navigation never succeeds.
    server.goto_failures.store(1_000_000, Ordering::SeqCst);

    let mut config = test_config();
    // A single attempt with a multi-second backoff: the first failure
    // already exhausts the budget, so the scheduled retry slot can never
    // be taken and the job must not sleep it out.
    config.retry.max_attempts = 1;
    config.retry.base_delay_ms = 2_000;

    let orchestrator = ScrapingOrchestrator::new(
        config,
        FakeFactory {
            server: Arc::clone(&server),
            fail_launch: false,
        },
        db.clone(),
    );

    let started = Instant::now();
    let report = orchestrator
        .run(pharmacy_job(false))
        .await
        .expect("run job");
    let elapsed = started.elapsed();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.stats.units_succeeded, 0);
    assert_eq!(report.stats.units_abandoned, 1);
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].attempts, 1);
    assert!(
        elapsed < Duration::from_millis(1_500),
        "job took {elapsed:?}; a dead backoff was slept out"
    );

    let pending = retry_queue::pending_count(db.pool(), report.session_id.as_str())
        .await
        .expect("pending count");
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn test_invalid_listings_url_shows_up_in_abandoned_counters() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let server = Arc::new(PageServer::new());

    let mut config = test_config();
    // Every unit fails before any navigation, with an error that cannot
    // be retried and so never enters the queue.
    config.targets.listings_base_url = "not a url".to_string();

    let orchestrator = ScrapingOrchestrator::new(
        config,
        FakeFactory {
            server,
            fail_launch: false,
        },
        db.clone(),
    );
    let mut events = orchestrator.events().subscribe();

    let report = orchestrator
        .run(pharmacy_job(false))
        .await
        .expect("run job");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.stats.units_succeeded, 0);
    assert_eq!(report.stats.units_abandoned, 1);
    assert_eq!(
        report.stats.units_total,
        report.stats.units_succeeded + report.stats.units_abandoned
    );
    assert_eq!(report.abandoned.len(), 1);
    assert_eq!(report.abandoned[0].item_key, "alpha::pharmacy");

    // Nothing was queued for an error that can never succeed.
    let pending = retry_queue::pending_count(db.pool(), report.session_id.as_str())
        .await
        .expect("pending count");
    assert_eq!(pending, 0);

    // The failure was surfaced as a terminal error event.
    let mut saw_terminal_error = false;
    while let Ok(event) = events.try_recv() {
        if let ScrapeEvent::Error(e) = event {
            assert!(!e.will_retry);
            saw_terminal_error = true;
        }
    }
    assert!(saw_terminal_error);
}

#[tokio::test]
async fn test_no_browser_at_all_fails_the_job() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let server = Arc::new(PageServer::new());

    let orchestrator = ScrapingOrchestrator::new(
        test_config(),
        FakeFactory {
            server,
            fail_launch: true,
        },
        db.clone(),
    );

    let report = orchestrator
        .run(pharmacy_job(false))
        .await
        .expect("run finishes with a report");

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.stats.units_succeeded, 0);
    assert!(report.records.is_empty());

    let job = scrape_jobs::get_job(db.pool(), report.session_id.as_str())
        .await
        .expect("job row");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());
}

#[tokio::test]
async fn test_stop_is_honored_at_batch_boundary() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db = test_db(&dir).await;
    let mut server = PageServer::new();
    // The first unit navigates freely; any later navigation blocks on the
    // gate, which only opens after `stop()` has landed. No later unit can
    // complete before the cancellation, whatever the scheduler does.
    server.free_gotos = AtomicU32::new(1);
    let server = Arc::new(server);

    let mut config = test_config();
    // One unit per browser so every unit is a batch boundary.
    config.batch.max_ops_per_browser = 1;

    let orchestrator = Arc::new(ScrapingOrchestrator::new(
        config,
        FakeFactory {
            server: Arc::clone(&server),
            fail_launch: false,
        },
        db,
    ));
    let mut events = orchestrator.events().subscribe();

    let spec = JobSpec {
        towns: vec!["Alpha".to_string(), "Beta".to_string()],
        industries: vec!["Pharmacy".to_string(), "Bakery".to_string()],
        do_provider_lookup: false,
        concurrency: None,
    };

    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(spec).await })
    };

    // Wait for the first unit to land, then request cancellation and let
    // any navigation already in flight finish.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event before timeout")
            .expect("channel open");
        if matches!(event, ScrapeEvent::Progress(_)) {
            break;
        }
    }
    orchestrator.stop().await;
    server.gate.add_permits(16);

    let report = runner
        .await
        .expect("runner task")
        .expect("run returns report");

    assert_eq!(report.status, JobStatus::Stopped);
    assert!(report.stats.units_succeeded >= 1);
    assert!(
        report.stats.units_succeeded <= 2,
        "cancellation must leave later units unstarted"
    );
}
