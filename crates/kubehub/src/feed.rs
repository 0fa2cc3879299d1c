//! Resumable list+watch change feed.
//!
//! The feed lists every resource (delivered as `Created`), then watches from the
//! list cursor. A watch that closes normally is reopened from the last cursor;
//! an expired cursor or a broken stream falls back to a fresh list. Events are
//! handed to the sink one at a time, in store order.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use hookwatch_core::{EventKind, ResourceSnapshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{FeedError, Listing, ResourceStore, StoreEvent, StoreStream};

/// Receiver of feed events. Each call is awaited before the next event is read.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, snapshot: ResourceSnapshot, kind: EventKind);
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self { initial_backoff: Duration::from_secs(1), max_backoff: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedPhase {
    Initializing,
    Syncing,
    Watching,
    Stopped,
}

/// Resume point: last observed resource version plus whether a full list completed.
#[derive(Debug, Default)]
struct WatchCursor {
    resource_version: Option<String>,
    synced: bool,
}

enum StreamEnd {
    Closed { events: usize },
    Broken(FeedError),
    Cancelled,
}

pub struct ChangeFeed<S> {
    store: S,
    opts: FeedOptions,
    phase: FeedPhase,
    cursor: WatchCursor,
    /// Last snapshot per `namespace/name`, used to report resources that vanish across a relist.
    known: HashMap<String, ResourceSnapshot>,
    backoff: Duration,
}

impl<S: ResourceStore> ChangeFeed<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, FeedOptions::default())
    }

    pub fn with_options(store: S, opts: FeedOptions) -> Self {
        let backoff = opts.initial_backoff;
        Self { store, opts, phase: FeedPhase::Initializing, cursor: WatchCursor::default(), known: HashMap::new(), backoff }
    }

    /// Drive the feed until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between events; an event already handed to the sink
    /// runs to completion.
    pub async fn run<K>(mut self, sink: &K, shutdown: CancellationToken)
    where
        K: EventSink + ?Sized,
    {
        self.transition(FeedPhase::Syncing);
        while self.phase != FeedPhase::Stopped {
            if shutdown.is_cancelled() {
                self.transition(FeedPhase::Stopped);
                break;
            }
            match self.phase {
                FeedPhase::Initializing | FeedPhase::Syncing => self.sync(sink, &shutdown).await,
                FeedPhase::Watching => self.watch(sink, &shutdown).await,
                FeedPhase::Stopped => {}
            }
        }
        info!("change feed stopped");
    }

    fn transition(&mut self, next: FeedPhase) {
        if self.phase != next {
            debug!(from = ?self.phase, to = ?next, "feed phase");
            self.phase = next;
        }
    }

    fn resync(&mut self, reason: &str) {
        warn!(reason, cursor = ?self.cursor.resource_version, "watch broken; relisting");
        metrics::counter!("hookwatch_feed_resyncs_total", 1u64);
        self.cursor.synced = false;
        self.transition(FeedPhase::Syncing);
    }

    async fn sync<K: EventSink + ?Sized>(&mut self, sink: &K, shutdown: &CancellationToken) {
        let listed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            r = self.store.list() => Some(r),
        };
        let Some(listed) = listed else {
            self.transition(FeedPhase::Stopped);
            return;
        };
        match listed {
            Ok(listing) => {
                self.apply_listing(listing, sink).await;
                self.backoff = self.opts.initial_backoff;
                self.transition(FeedPhase::Watching);
            }
            Err(e) => {
                warn!(error = %e, backoff = ?self.backoff, "list failed; retrying");
                self.pause(shutdown).await;
            }
        }
    }

    async fn apply_listing<K: EventSink + ?Sized>(&mut self, listing: Listing, sink: &K) {
        let count = listing.items.len();
        let mut previous = std::mem::take(&mut self.known);
        for snap in listing.items {
            if let Some(key) = snap.key() {
                previous.remove(&key);
                self.known.insert(key, snap.clone());
            }
            self.deliver(sink, snap, EventKind::Created).await;
        }
        let mut vanished: Vec<_> = previous.into_iter().collect();
        vanished.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, snap) in vanished {
            self.deliver(sink, snap, EventKind::Deleted).await;
        }
        self.cursor.resource_version = Some(listing.cursor).filter(|c| !c.is_empty());
        self.cursor.synced = true;
        info!(count, cursor = ?self.cursor.resource_version, "initial list delivered");
    }

    async fn watch<K: EventSink + ?Sized>(&mut self, sink: &K, shutdown: &CancellationToken) {
        if !self.cursor.synced {
            self.transition(FeedPhase::Syncing);
            return;
        }
        let from = self.cursor.resource_version.clone().unwrap_or_default();
        let opened = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            r = self.store.watch(&from) => Some(r),
        };
        let Some(opened) = opened else {
            self.transition(FeedPhase::Stopped);
            return;
        };
        let stream = match opened {
            Ok(s) => s,
            Err(FeedError::Expired) => {
                self.resync("cursor expired");
                return;
            }
            Err(e) => {
                warn!(error = %e, backoff = ?self.backoff, "watch failed to open");
                self.pause(shutdown).await;
                if self.phase != FeedPhase::Stopped {
                    self.resync("watch open failed");
                }
                return;
            }
        };
        debug!(cursor = %from, "watch opened");
        match self.consume(stream, sink, shutdown).await {
            StreamEnd::Closed { events: 0 } => {
                // An empty close makes no progress; back off before reopening.
                debug!(backoff = ?self.backoff, cursor = ?self.cursor.resource_version, "watch closed without events");
                self.pause(shutdown).await;
            }
            StreamEnd::Closed { events } => {
                debug!(events, cursor = ?self.cursor.resource_version, "watch closed; resuming from cursor");
                self.backoff = self.opts.initial_backoff;
            }
            StreamEnd::Broken(FeedError::Expired) => self.resync("cursor expired"),
            StreamEnd::Broken(e) => {
                let reason = e.to_string();
                self.resync(&reason);
            }
            StreamEnd::Cancelled => self.transition(FeedPhase::Stopped),
        }
    }

    async fn consume<K: EventSink + ?Sized>(&mut self, mut stream: StoreStream, sink: &K, shutdown: &CancellationToken) -> StreamEnd {
        let mut events = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StreamEnd::Cancelled,
                n = stream.next() => n,
            };
            let ev = match next {
                None => return StreamEnd::Closed { events },
                Some(Ok(ev)) => ev,
                Some(Err(e)) if e.is_decode() => {
                    warn!(error = %e, "skipping undecodable watch event");
                    metrics::counter!("hookwatch_feed_decode_errors_total", 1u64);
                    continue;
                }
                Some(Err(e)) => return StreamEnd::Broken(e),
            };
            events += 1;
            match ev {
                StoreEvent::Added(s) => self.observe(sink, s, EventKind::Created).await,
                StoreEvent::Modified(s) => self.observe(sink, s, EventKind::Updated).await,
                StoreEvent::Deleted(s) => self.observe(sink, s, EventKind::Deleted).await,
                StoreEvent::Bookmark(rv) => {
                    if !rv.is_empty() {
                        self.cursor.resource_version = Some(rv);
                    }
                }
            }
        }
    }

    async fn observe<K: EventSink + ?Sized>(&mut self, sink: &K, snap: ResourceSnapshot, kind: EventKind) {
        if let Some(rv) = snap.resource_version.as_ref().filter(|rv| !rv.is_empty()) {
            self.cursor.resource_version = Some(rv.clone());
        }
        if let Some(key) = snap.key() {
            if kind == EventKind::Deleted {
                self.known.remove(&key);
            } else {
                self.known.insert(key, snap.clone());
            }
        }
        self.deliver(sink, snap, kind).await;
    }

    async fn deliver<K: EventSink + ?Sized>(&self, sink: &K, snap: ResourceSnapshot, kind: EventKind) {
        metrics::counter!("hookwatch_feed_events_total", 1u64, "kind" => kind.as_str());
        sink.on_event(snap, kind).await;
    }

    /// Sleep for the current backoff (cancellable) and grow it.
    async fn pause(&mut self, shutdown: &CancellationToken) {
        let cancelled = tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.backoff) => false,
        };
        if cancelled {
            self.transition(FeedPhase::Stopped);
        }
        self.backoff = (self.backoff * 2).min(self.opts.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoStore;

    #[async_trait::async_trait]
    impl ResourceStore for NoStore {
        async fn list(&self) -> Result<Listing, FeedError> {
            Err(FeedError::Status { code: 500, message: "down".into() })
        }
        async fn watch(&self, _cursor: &str) -> Result<StoreStream, FeedError> {
            Err(FeedError::Expired)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_up_to_cap() {
        let opts = FeedOptions { initial_backoff: Duration::from_secs(1), max_backoff: Duration::from_secs(5) };
        let mut feed = ChangeFeed::with_options(NoStore, opts);
        let token = CancellationToken::new();
        let seen: Vec<_> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                feed.pause(&token).await;
                v.push(feed.backoff);
            }
            v
        };
        assert_eq!(seen, vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(5), Duration::from_secs(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_clears_synced_flag() {
        let mut feed = ChangeFeed::new(NoStore);
        feed.cursor.synced = true;
        feed.phase = FeedPhase::Watching;
        feed.resync("test");
        assert!(!feed.cursor.synced);
        assert_eq!(feed.phase, FeedPhase::Syncing);
    }
}
