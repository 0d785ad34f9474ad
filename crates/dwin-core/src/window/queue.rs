//! Bounded FIFO of buffered keys.
//!
//! Front is the oldest event (the head), back is the most recent one. The
//! queue holds one slot more than the window size so a push can land before
//! the overflow eviction that follows it.

use crate::WindowError;
use std::collections::VecDeque;
use tokio::time::Instant;

/// One queued event: its key and deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSlot {
    pub key: String,
    pub expire_at: Instant,
}

/// Ring buffer ordered by first arrival.
#[derive(Debug)]
pub struct FifoQueue {
    slots: VecDeque<QueueSlot>,
    capacity: usize,
}

impl FifoQueue {
    /// Create a queue for a window of `size` events (capacity `size + 1`).
    pub fn new(size: usize) -> Self {
        let capacity = size.saturating_add(1);
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, returning the new length.
    pub fn push_tail(&mut self, slot: QueueSlot) -> Result<usize, WindowError> {
        if self.slots.len() >= self.capacity {
            return Err(WindowError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.slots.push_back(slot);
        Ok(self.slots.len())
    }

    /// Remove and return the oldest slot.
    pub fn pop_head(&mut self) -> Option<QueueSlot> {
        self.slots.pop_front()
    }

    pub fn head(&self) -> Option<&QueueSlot> {
        self.slots.front()
    }

    pub fn tail(&self) -> Option<&QueueSlot> {
        self.slots.back()
    }

    /// Deadline of the head, the instant the expiration timer must target.
    pub fn head_deadline(&self) -> Option<Instant> {
        self.head().map(|slot| slot.expire_at)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every slot.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Keys from head to tail.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.key.as_str())
    }
}
