use std::sync::atomic::{AtomicU64, Ordering};

use hookwatch_core::{normalize, EventKind, ResourceSnapshot};
use hookwatch_dispatch::Dispatcher;
use hookwatch_kubehub::{ChangeFeed, EventSink, FeedOptions, ResourceStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Running totals, reported when the supervisor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub events: u64,
    pub skipped: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Chains normalize → dispatch for every feed event.
pub struct Supervisor {
    dispatcher: Dispatcher,
    events: AtomicU64,
    skipped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Supervisor {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            events: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            events: self.events.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Drive `store` through a change feed until `shutdown` fires.
    pub async fn watch<S: ResourceStore>(&self, store: S, opts: FeedOptions, shutdown: CancellationToken) {
        info!(destinations = self.dispatcher.destinations(), "watch supervisor started");
        ChangeFeed::with_options(store, opts).run(self, shutdown).await;
        let s = self.stats();
        info!(events = s.events, skipped = s.skipped, delivered = s.delivered, failed = s.failed, "watch supervisor stopped");
    }
}

#[async_trait::async_trait]
impl EventSink for Supervisor {
    async fn on_event(&self, snapshot: ResourceSnapshot, kind: EventKind) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let Some(event) = normalize(&snapshot, kind) else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %kind, key = ?snapshot.key(), "resource lacks namespace or name; skipping");
            return;
        };
        info!(ns = %event.namespace, name = %event.name, kind = %kind, "relaying resource event");
        let reports = self.dispatcher.dispatch(&event).await;
        let ok = reports.iter().filter(|r| r.is_success()).count() as u64;
        let failed = reports.len() as u64 - ok;
        self.delivered.fetch_add(ok, Ordering::Relaxed);
        self.failed.fetch_add(failed, Ordering::Relaxed);
        debug!(ns = %event.namespace, name = %event.name, ok, failed, "dispatch finished");
    }
}
