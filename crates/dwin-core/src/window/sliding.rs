//! The sliding window: dedup index, FIFO queue, expiration timer and
//! dispatcher wired together.
//!
//! # Locking
//!
//! - `push_lock` covers first-arrival insertion and the overflow eviction it
//!   may trigger.
//! - `pop_lock` serializes evictions from producers and from the timer task.
//!   Lock order is push, then pop.
//! - `queue` is the innermost lock and is never held across an await. Queue
//!   mutation and timer re-arm always happen together under it.

use super::eviction::{EvictionChecker, EvictionReason};
use super::index::{BufferedEntry, DedupIndex, InsertOutcome};
use super::queue::{FifoQueue, QueueSlot};
use super::timer::ExpirationTimer;
use crate::config::{DispatchMode, WindowConfig};
use crate::dispatch::Dispatcher;
use crate::event::{EventMeta, UniqueEvent};
use crate::metrics::WindowMetrics;
use crate::{DispatchError, Result, WindowError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of [`Window::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First arrival of the key; the event is now buffered
    Inserted,
    /// The key was already buffered and absorbed this arrival
    Merged { repeat_count: u64 },
}

/// An evicted event the pool refused in [`DispatchMode::Report`].
#[derive(Debug)]
pub struct Rejected<E> {
    pub event: E,
    pub meta: EventMeta,
    pub error: DispatchError,
}

/// Point-in-time view of a window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub size: usize,
    pub duration_ms: u64,
    pub pool_size: usize,
    pub dispatch_mode: DispatchMode,
    pub buffered: usize,
    pub in_flight: usize,
    pub closed: bool,
    pub events_added: u64,
    pub events_merged: u64,
    pub evictions_expired: u64,
    pub evictions_overflow: u64,
    pub callbacks_dispatched: u64,
    pub callbacks_dropped: u64,
    pub callbacks_rejected: u64,
}

impl WindowStats {
    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Overflow,
}

struct Shared<E: UniqueEvent> {
    config: WindowConfig,
    duration: Duration,
    index: DedupIndex<E>,
    queue: Mutex<FifoQueue>,
    push_lock: tokio::sync::Mutex<()>,
    pop_lock: tokio::sync::Mutex<()>,
    checker: EvictionChecker,
    timer: ExpirationTimer,
    dispatcher: Dispatcher,
    metrics: Arc<WindowMetrics>,
    rejections: Option<mpsc::Sender<Rejected<E>>>,
    closed: AtomicBool,
}

/// Deduplicating sliding window.
///
/// Holds at most `size` unique events for at most `duration` each, and hands
/// every evicted event to [`UniqueEvent::listen`] through a bounded worker
/// pool.
pub struct Window<E: UniqueEvent> {
    shared: Arc<Shared<E>>,
    rejections: Mutex<Option<mpsc::Receiver<Rejected<E>>>>,
}

impl<E: UniqueEvent> Window<E> {
    /// Create a window and start its expiration timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: WindowConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| WindowError::NoRuntime)?;

        if config.dispatch_mode != DispatchMode::Block && config.pool_size == 1 {
            warn!(
                mode = ?config.dispatch_mode,
                "Single-worker non-blocking pool skips every callback that overlaps a running one"
            );
        }

        // At most `size` rejections wait for the caller; the rest are dropped
        let (rejections_tx, rejections_rx) = match config.dispatch_mode {
            DispatchMode::Report => {
                let (tx, rx) = mpsc::channel(config.size);
                (Some(tx), Some(rx))
            }
            DispatchMode::Block | DispatchMode::Drop => (None, None),
        };

        let shared = Arc::new_cyclic(|weak: &Weak<Shared<E>>| {
            let weak = weak.clone();
            let timer = ExpirationTimer::spawn(&runtime, move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(shared) => {
                            shared.evict(Trigger::Timer).await;
                            true
                        }
                        None => false,
                    }
                }
            });

            Shared {
                duration: config.duration(),
                index: DedupIndex::with_capacity(config.size),
                queue: Mutex::new(FifoQueue::new(config.size)),
                push_lock: tokio::sync::Mutex::new(()),
                pop_lock: tokio::sync::Mutex::new(()),
                checker: EvictionChecker::new(config.size),
                timer,
                dispatcher: Dispatcher::from_config(&config),
                metrics: Arc::new(WindowMetrics::new()),
                rejections: rejections_tx,
                closed: AtomicBool::new(false),
                config,
            }
        });

        info!(
            size = shared.config.size,
            duration_ms = shared.config.duration_ms,
            pool_size = shared.config.pool_size,
            mode = ?shared.config.dispatch_mode,
            "Sliding window started"
        );

        Ok(Self {
            shared,
            rejections: Mutex::new(rejections_rx),
        })
    }

    /// Add an event.
    ///
    /// A duplicate of a buffered key is merged into it and keeps its original
    /// position and deadline. A new key goes to the tail; if that overflows
    /// the window the head is evicted before this returns. In
    /// [`DispatchMode::Block`] that eviction may wait for a free worker.
    pub async fn add(&self, event: E) -> Result<AddOutcome> {
        let shared = &self.shared;
        if shared.is_closed() {
            return Err(WindowError::Closed.into());
        }

        let event = match shared.index.merge_existing(event) {
            Ok(repeat_count) => return Ok(shared.merged(repeat_count)),
            Err(event) => event,
        };

        let _push = shared.push_lock.lock().await;
        if shared.is_closed() {
            return Err(WindowError::Closed.into());
        }

        let key = event.key().to_string();
        let expire_at = Instant::now() + shared.duration;
        let entry = BufferedEntry::new(event, expire_at);
        if let InsertOutcome::Merged { repeat_count } =
            shared.index.insert_or_merge(key.clone(), entry)
        {
            return Ok(shared.merged(repeat_count));
        }

        let pushed = {
            let mut queue = shared.queue.lock();
            let pushed = queue.push_tail(QueueSlot {
                key: key.clone(),
                expire_at,
            });
            if let Ok(len) = pushed {
                if len == 1 {
                    shared.timer.arm_at(expire_at);
                }
                shared.metrics.set_buffered(len);
            }
            pushed
        };

        let len = match pushed {
            Ok(len) => len,
            Err(err) => {
                shared.index.remove(&key);
                warn!(key = %key, error = %err, "Rolled back insert");
                return Err(err.into());
            }
        };

        shared.metrics.record_added();
        debug!(key = %key, buffered = len, "Event buffered");

        if len > shared.checker.size() {
            shared.evict(Trigger::Overflow).await;
        }

        Ok(AddOutcome::Inserted)
    }

    /// Stop the window.
    ///
    /// Waits for an in-progress timer eviction and for running callbacks.
    /// Events still buffered are discarded without callbacks. Calling it
    /// again is a no-op.
    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        shared.timer.cancel().await;

        // No add or eviction is in flight once both locks are held
        let _push = shared.push_lock.lock().await;
        let _pop = shared.pop_lock.lock().await;

        shared.dispatcher.release().await;

        let discarded = {
            let mut queue = shared.queue.lock();
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        shared.index.clear();
        shared.metrics.set_buffered(0);

        info!(discarded, "Sliding window closed");
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an event with `key` is currently buffered.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.index.contains(key)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn config(&self) -> &WindowConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> Arc<WindowMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Snapshot of sizes and counters.
    pub fn stats(&self) -> WindowStats {
        let shared = &self.shared;
        let metrics = &shared.metrics;
        WindowStats {
            size: shared.config.size,
            duration_ms: shared.config.duration_ms,
            pool_size: shared.config.pool_size,
            dispatch_mode: shared.config.dispatch_mode,
            buffered: self.len(),
            in_flight: shared.dispatcher.in_flight(),
            closed: shared.is_closed(),
            events_added: metrics.events_added(),
            events_merged: metrics.events_merged(),
            evictions_expired: metrics.evictions(EvictionReason::Expired),
            evictions_overflow: metrics.evictions(EvictionReason::Overflow),
            callbacks_dispatched: metrics.callbacks_dispatched(),
            callbacks_dropped: metrics.callbacks_dropped(),
            callbacks_rejected: metrics.callbacks_rejected(),
        }
    }

    /// Take the receiving end of the rejection channel.
    ///
    /// Only windows in [`DispatchMode::Report`] have one, and it can be taken
    /// once. The channel holds up to `size` rejections; further ones are
    /// counted as dropped until the receiver catches up.
    pub fn take_rejections(&self) -> Option<mpsc::Receiver<Rejected<E>>> {
        self.rejections.lock().take()
    }
}

impl<E: UniqueEvent> Shared<E> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn merged(&self, repeat_count: u64) -> AddOutcome {
        self.metrics.record_merged();
        AddOutcome::Merged { repeat_count }
    }

    /// Pop the head if the trigger calls for it and dispatch its callback.
    async fn evict(&self, trigger: Trigger) {
        let _pop = self.pop_lock.lock().await;
        let now = Instant::now();

        let (slot, reason) = {
            let mut queue = self.queue.lock();
            let decision = match trigger {
                Trigger::Overflow => self.checker.check_overflow(queue.len()),
                Trigger::Timer => self.checker.check(queue.len(), queue.head_deadline(), now),
            };

            let popped = match decision.reason() {
                Some(reason) => queue.pop_head().map(|slot| (slot, reason)),
                None => None,
            };
            // A timer fire consumes its deadline, so it always re-arms
            if popped.is_some() || trigger == Trigger::Timer {
                self.timer.rearm(queue.head_deadline());
            }
            self.metrics.set_buffered(queue.len());

            match popped {
                Some(popped) => popped,
                None => return,
            }
        };

        let Some(entry) = self.index.remove(&slot.key) else {
            warn!(key = %slot.key, "Evicted key missing from index");
            return;
        };

        let arrived_at = entry.expire_at - self.duration;
        let meta = EventMeta {
            arrived_at,
            added_at: entry.added_at,
            repeat_count: entry.repeat_count,
        };
        self.metrics
            .record_eviction(reason, now.saturating_duration_since(arrived_at));
        debug!(
            key = %slot.key,
            reason = %reason,
            repeat_count = meta.repeat_count,
            "Event evicted"
        );

        self.dispatch(entry.event, meta).await;
    }

    async fn dispatch(&self, event: E, meta: EventMeta) {
        match self.dispatcher.reserve().await {
            Ok(worker) => {
                worker.spawn(event.listen(meta));
                self.metrics.record_dispatched();
            }
            Err(error) => match &self.rejections {
                Some(tx) => {
                    let key = event.key().to_string();
                    match tx.try_send(Rejected { event, meta, error }) {
                        Ok(()) => {
                            self.metrics.record_rejected();
                            debug!(key = %key, "Callback rejected");
                        }
                        Err(err) => {
                            let backlog_full = matches!(err, TrySendError::Full(_));
                            self.metrics.record_dropped();
                            warn!(
                                key = %key,
                                error = %err.into_inner().error,
                                backlog_full,
                                "Rejection not delivered, callback dropped"
                            );
                        }
                    }
                }
                None => {
                    self.metrics.record_dropped();
                    warn!(key = %event.key(), error = %error, "Callback dropped");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Ping {
        key: String,
        seen: Arc<Mutex<Vec<(String, EventMeta)>>>,
    }

    #[async_trait]
    impl UniqueEvent for Ping {
        fn key(&self) -> &str {
            &self.key
        }

        async fn listen(self, meta: EventMeta) {
            self.seen.lock().push((self.key, meta));
        }
    }

    fn window(size: usize, secs: u64) -> (Window<Ping>, Arc<Mutex<Vec<(String, EventMeta)>>>) {
        let config = WindowConfig::new()
            .with_size(size)
            .with_duration(Duration::from_secs(secs))
            .with_block_pool(4);
        (Window::new(config).unwrap(), Arc::new(Mutex::new(Vec::new())))
    }

    fn ping(key: &str, seen: &Arc<Mutex<Vec<(String, EventMeta)>>>) -> Ping {
        Ping {
            key: key.to_string(),
            seen: Arc::clone(seen),
        }
    }

    #[test]
    fn test_new_outside_runtime() {
        let err = Window::<Ping>::new(WindowConfig::default()).err().unwrap();
        assert!(matches!(err, crate::Error::Window(WindowError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let err = Window::<Ping>::new(WindowConfig::new().with_size(0))
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_merge() {
        let (window, seen) = window(4, 1);

        assert_eq!(window.add(ping("a", &seen)).await.unwrap(), AddOutcome::Inserted);
        assert_eq!(
            window.add(ping("a", &seen)).await.unwrap(),
            AddOutcome::Merged { repeat_count: 1 }
        );
        assert_eq!(window.len(), 1);
        assert!(window.contains("a"));
        assert!(!window.contains("b"));

        let stats = window.stats();
        assert_eq!(stats.events_added, 1);
        assert_eq!(stats.events_merged, 1);
        assert_eq!(stats.buffered, 1);

        let json = stats.to_json().unwrap();
        assert!(json.contains("\"dispatch_mode\": \"block\""));
        window.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_head() {
        let (window, seen) = window(1, 10);

        window.add(ping("a", &seen)).await.unwrap();
        window.add(ping("b", &seen)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert!(window.contains("b"));

        // Let the spawned callback run
        tokio::time::sleep(Duration::from_millis(1)).await;
        let keys: Vec<_> = seen.lock().iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(keys, vec!["a"]);
        assert_eq!(window.metrics().evictions(EvictionReason::Overflow), 1);
        window.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_head() {
        let (window, seen) = window(4, 1);
        let start = Instant::now();

        window.add(ping("a", &seen)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(window.is_empty());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.arrived_at, start);
        assert_eq!(window.metrics().evictions(EvictionReason::Expired), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_and_rejects() {
        let (window, seen) = window(4, 1);

        window.add(ping("a", &seen)).await.unwrap();
        window.close().await;
        window.close().await;
        assert!(window.is_closed());
        assert!(window.is_empty());

        let err = window.add(ping("b", &seen)).await.unwrap_err();
        assert!(matches!(err, crate::Error::Window(WindowError::Closed)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_channel_only_in_report_mode() {
        let (window, _) = window(4, 1);
        assert!(window.take_rejections().is_none());

        let config = WindowConfig::new().with_dispatch_mode(DispatchMode::Report);
        let window = Window::<Ping>::new(config).unwrap();
        assert!(window.take_rejections().is_some());
        assert!(window.take_rejections().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fire_before_head_deadline_rearms() {
        let (window, seen) = window(4, 1);
        let start = Instant::now();

        window.add(ping("a", &seen)).await.unwrap();
        window.add(ping("b", &seen)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Early fire: the head has half its duration left
        window.shared.evict(Trigger::Timer).await;

        assert_eq!(window.len(), 2);
        assert!(window.contains("a"));
        let head = window.shared.queue.lock().head_deadline();
        assert_eq!(head, Some(start + Duration::from_secs(1)));
        assert_eq!(window.shared.timer.deadline(), head);
        assert_eq!(window.metrics().evictions(EvictionReason::Expired), 0);
        assert!(seen.lock().is_empty());

        // The re-armed deadline still expires the head on time
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(window.is_empty());
        assert_eq!(window.metrics().evictions(EvictionReason::Expired), 2);
        window.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_backlog_is_bounded() {
        struct Stuck(String);

        #[async_trait]
        impl UniqueEvent for Stuck {
            fn key(&self) -> &str {
                &self.0
            }

            async fn listen(self, _meta: EventMeta) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        let config = WindowConfig::new()
            .with_size(1)
            .with_duration(Duration::from_secs(60))
            .with_non_block_pool(1)
            .with_dispatch_mode(DispatchMode::Report);
        let window = Window::<Stuck>::new(config).unwrap();

        for i in 0..200 {
            window.add(Stuck(format!("k{i}"))).await.unwrap();
        }

        // 199 evictions: one runs, one waits in the backlog, the rest drop
        let stats = window.stats();
        assert_eq!(stats.callbacks_dispatched, 1);
        assert_eq!(stats.callbacks_rejected, 1);
        assert_eq!(stats.callbacks_dropped, 197);

        let mut rx = window.take_rejections().unwrap();
        let mut retained = Vec::new();
        while let Ok(rejected) = rx.try_recv() {
            retained.push(rejected.event.0);
        }
        assert_eq!(retained, vec!["k1"]);
    }

    #[tokio::test]
    async fn test_single_worker_non_blocking_pool_is_accepted() {
        let config = WindowConfig::new()
            .with_non_block_pool(1)
            .with_dispatch_mode(DispatchMode::Drop);
        assert!(config.validate().is_ok());

        let window = Window::<Ping>::new(config).unwrap();
        assert_eq!(window.config().pool_size, 1);
        window.close().await;
    }
}
