//! Surfaces new lifecycle events for the watched object.
//!
//! "Most recent" means "last in the list as returned by the API"; the feed is
//! not re-sorted by timestamp.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fluxr_core::{EventNotice, EventRecord, Reporter, WatchTarget};
use fluxr_kubehub::ClusterApi;

/// Events requested per poll.
pub const EVENT_LIST_LIMIT: u32 = 10;
/// Events folded into the fingerprint.
pub const FINGERPRINT_DEPTH: usize = 3;
/// Notices shown when the fingerprint changes.
pub const NOTICES_PER_CHANGE: usize = 2;

/// `reason:type:message` of the last `FINGERPRINT_DEPTH` events, newest first.
pub fn fingerprint(events: &[EventRecord]) -> String {
    events
        .iter()
        .rev()
        .take(FINGERPRINT_DEPTH)
        .map(|e| format!("{}:{}:{}", e.reason, e.event_type, e.message))
        .collect()
}

pub struct EventDeduplicator {
    api: Arc<dyn ClusterApi>,
    target: WatchTarget,
    reporter: Arc<dyn Reporter>,
    last_fingerprint: Mutex<String>,
}

impl EventDeduplicator {
    pub fn new(api: Arc<dyn ClusterApi>, target: WatchTarget, reporter: Arc<dyn Reporter>) -> Self {
        Self { api, target, reporter, last_fingerprint: Mutex::new(String::new()) }
    }

    /// Fetch events once and report up to two notices if anything changed.
    /// Returns what was reported. Fetch errors count as "nothing new".
    pub async fn poll_once(&self) -> Vec<EventNotice> {
        let events = match self.api.list_events(&self.target.namespace, &self.target.name, EVENT_LIST_LIMIT).await {
            Ok(events) => events,
            Err(e) => {
                debug!(resource = %self.target, error = %e, "event list failed");
                return Vec::new();
            }
        };
        let limit = EVENT_LIST_LIMIT as usize;
        let events = &events[events.len().saturating_sub(limit)..];
        if events.is_empty() {
            return Vec::new();
        }

        let fp = fingerprint(events);
        {
            let mut last = self.last_fingerprint.lock().unwrap_or_else(|p| p.into_inner());
            if *last == fp {
                return Vec::new();
            }
            *last = fp;
        }

        let notices: Vec<EventNotice> = events.iter().rev().take(NOTICES_PER_CHANGE).map(EventNotice::from).collect();
        for n in &notices {
            self.reporter.event(n);
        }
        counter!("fluxr_event_notices_total", notices.len() as u64);
        notices
    }

    /// Poll every `every` until `cancel` fires.
    pub async fn watch(&self, cancel: CancellationToken, every: Duration) {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
        debug!(resource = %self.target, "event watcher stopped");
    }

    /// Run [`watch`](Self::watch) on its own task. Poll period comes from `FLUXR_EVENTS_SECS` (default 3s).
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let every = crate::env_secs("FLUXR_EVENTS_SECS", 3);
        tokio::spawn(async move { self.watch(cancel, every).await })
    }
}
