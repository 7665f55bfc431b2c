//! Progress reporting for scrape jobs.
//!
//! The orchestrator's only coupling to its consumers is the event stream:
//! it knows nothing about who subscribes or over what transport events are
//! relayed. Delivery is a `tokio::sync::broadcast` channel, so each event
//! reaches every current subscriber once, in emission order.

use chrono::{DateTime, Utc};
use leadscout_core::{JobStatus, ScrapeStats};
use serde::Serialize;
use tokio::sync::broadcast;

/// Work advanced: counters after one work unit resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressPayload {
    /// Session the job runs under
    pub session_id: String,
    /// Units resolved so far (succeeded + abandoned)
    pub units_done: u32,
    /// Units generated from the cross-product
    pub units_total: u32,
    /// Records collected so far
    pub businesses_found: u32,
    /// Town of the unit that just resolved
    pub town: String,
    /// Industry of the unit that just resolved
    pub industry: String,
    /// When the unit resolved
    pub timestamp: DateTime<Utc>,
}

/// Human-readable trace line.
#[derive(Debug, Clone, Serialize)]
pub struct LogPayload {
    /// Session the job runs under
    pub session_id: String,
    /// Log line
    pub message: String,
    /// When it was emitted
    pub timestamp: DateTime<Utc>,
}

/// Non-fatal per-unit failure.
#[derive(Debug, Clone, Serialize)]
pub struct UnitErrorPayload {
    /// Session the job runs under
    pub session_id: String,
    /// Natural key of the failing item
    pub item_key: String,
    /// Failure description
    pub error: String,
    /// Whether the item entered the retry queue
    pub will_retry: bool,
    /// When the failure was observed
    pub timestamp: DateTime<Utc>,
}

/// An item given up on after exhausting its retry budget.
#[derive(Debug, Clone, Serialize)]
pub struct AbandonedItem {
    /// Kind of work the item represented
    pub item_type: String,
    /// Natural key of the item
    pub item_key: String,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Most recent failure message
    pub last_error: Option<String>,
}

/// Final result of a job.
#[derive(Debug, Clone, Serialize)]
pub struct CompletePayload {
    /// Session the job ran under
    pub session_id: String,
    /// Terminal status reached
    pub status: JobStatus,
    /// Final counters
    pub stats: ScrapeStats,
    /// Items given up on
    pub abandoned: Vec<AbandonedItem>,
    /// When the job finished
    pub timestamp: DateTime<Utc>,
}

/// Events emitted by the orchestrator over the lifetime of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrapeEvent {
    /// One work unit resolved
    Progress(ProgressPayload),
    /// Human-readable trace line
    Log(LogPayload),
    /// Non-fatal per-item failure
    Error(UnitErrorPayload),
    /// Job reached a terminal state
    Complete(CompletePayload),
}

/// Broadcast fan-out for [`ScrapeEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScrapeEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScrapeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers.
    ///
    /// Emitting with no subscribers is fine; events are simply dropped.
    pub fn emit(&self, event: ScrapeEvent) {
        let _ = self.tx.send(event);
    }

    /// Convenience: emit a log line (also mirrored to tracing).
    pub fn log(&self, session_id: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[{}] {}", session_id, message);
        self.emit(ScrapeEvent::Log(LogPayload {
            session_id: session_id.to_string(),
            message,
            timestamp: Utc::now(),
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
