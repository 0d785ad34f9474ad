//! Dedup index: event key -> buffered entry.
//!
//! Backed by DashMap so duplicate lookups from concurrent producers only
//! contend on a shard lock. The index owns buffered events; eviction moves
//! them out by value.

use crate::event::UniqueEvent;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

/// A buffered occurrence of a unique key.
#[derive(Debug)]
pub struct BufferedEntry<E> {
    /// The first event seen for this key, merged with later duplicates
    pub event: E,
    /// Deadline fixed at first arrival, never refreshed
    pub expire_at: Instant,
    /// Wall-clock time of first arrival
    pub added_at: DateTime<Utc>,
    /// Duplicates absorbed while buffered
    pub repeat_count: u64,
}

impl<E: UniqueEvent> BufferedEntry<E> {
    pub fn new(event: E, expire_at: Instant) -> Self {
        Self {
            event,
            expire_at,
            added_at: Utc::now(),
            repeat_count: 0,
        }
    }

    pub fn key(&self) -> &str {
        self.event.key()
    }
}

/// Result of [`DedupIndex::insert_or_merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry became the buffered occurrence of its key
    Inserted,
    /// The key was already buffered; the new event was merged into it
    Merged { repeat_count: u64 },
}

/// Concurrent map from key to buffered entry.
pub struct DedupIndex<E> {
    entries: DashMap<String, BufferedEntry<E>>,
}

impl<E: UniqueEvent> DedupIndex<E> {
    /// Create an index sized for a window of `size` events.
    pub fn with_capacity(size: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(size.saturating_add(1)),
        }
    }

    /// Merge `event` into the buffered entry with the same key.
    ///
    /// Returns the event back when its key is not buffered.
    pub fn merge_existing(&self, event: E) -> Result<u64, E> {
        match self.entries.get_mut(event.key()) {
            Some(mut buffered) => Ok(merge(&mut buffered, event)),
            None => Err(event),
        }
    }

    /// Insert `entry` under `key`, or merge its event if the key is taken.
    ///
    /// Exactly one of the two happens per call, atomically per key.
    pub fn insert_or_merge(&self, key: String, entry: BufferedEntry<E>) -> InsertOutcome {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => InsertOutcome::Merged {
                repeat_count: merge(occupied.get_mut(), entry.event),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                InsertOutcome::Inserted
            }
        }
    }

    /// Remove the mapping for `key`, returning the entry. No-op when absent.
    pub fn remove(&self, key: &str) -> Option<BufferedEntry<E>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Current repeat count for `key`, if buffered.
    pub fn repeat_count(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.repeat_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

// Runs under the shard write lock, which serializes merges of one key.
fn merge<E: UniqueEvent>(buffered: &mut BufferedEntry<E>, newer: E) -> u64 {
    buffered.repeat_count += 1;
    buffered.event.on_duplicate(newer);
    buffered.repeat_count
}
