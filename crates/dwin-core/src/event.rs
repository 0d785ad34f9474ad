//! Event capability contract.
//!
//! Anything pushed into a [`Window`](crate::window::Window) implements
//! [`UniqueEvent`]: a stable key used for deduplication, a callback run once
//! the event leaves the window, and an optional merge hook for duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Metadata handed to [`UniqueEvent::listen`] when an event is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    /// Monotonic instant of the first arrival
    pub arrived_at: Instant,
    /// Wall-clock time of the first arrival
    pub added_at: DateTime<Utc>,
    /// Duplicate arrivals absorbed while the event was buffered
    pub repeat_count: u64,
}

/// An event that can be deduplicated by the window.
///
/// `on_duplicate` runs while the window holds the per-key index lock, so it
/// must not call back into the same window. The default implementation keeps
/// the buffered event untouched.
#[async_trait]
pub trait UniqueEvent: Send + Sync + Sized + 'static {
    /// Stable key identifying the logical event.
    fn key(&self) -> &str;

    /// Called exactly once when the buffered event is evicted and dispatched.
    async fn listen(self, meta: EventMeta);

    /// Called on the buffered event for every later arrival with the same key.
    fn on_duplicate(&mut self, newer: Self) {
        let _ = newer;
    }
}
