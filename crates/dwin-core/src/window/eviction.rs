//! Eviction decisions for the sliding window.
//!
//! Two reasons pull the head out of the window: it outlived the window
//! duration, or a push made the window hold more than `size` events.

use std::fmt;
use tokio::time::Instant;

/// Why an event left the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// The head reached its deadline
    Expired,
    /// A push exceeded the window size
    Overflow,
}

impl EvictionReason {
    /// Get the label value for metrics and logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Overflow => "overflow",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Eviction decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionDecision {
    /// No eviction needed
    None,
    /// Head deadline elapsed
    EvictExpired,
    /// Window holds more than `size` events, evict immediately
    EvictOverflow,
}

impl EvictionDecision {
    /// Check if this decision removes the head.
    pub fn requires_eviction(&self) -> bool {
        !matches!(self, EvictionDecision::None)
    }

    /// Reason attached to the eviction, if any.
    pub fn reason(&self) -> Option<EvictionReason> {
        match self {
            EvictionDecision::None => None,
            EvictionDecision::EvictExpired => Some(EvictionReason::Expired),
            EvictionDecision::EvictOverflow => Some(EvictionReason::Overflow),
        }
    }
}

/// Evaluates the window state against its size limit.
#[derive(Debug, Clone, Copy)]
pub struct EvictionChecker {
    size: usize,
}

impl EvictionChecker {
    /// Create a checker for a window of `size` events.
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// Overflow check used right after a push.
    pub fn check_overflow(&self, len: usize) -> EvictionDecision {
        if len > self.size {
            EvictionDecision::EvictOverflow
        } else {
            EvictionDecision::None
        }
    }

    /// Full check used when the expiration timer fires.
    ///
    /// Overflow wins over expiry so the reported reason matches what a
    /// concurrent push would have done.
    pub fn check(
        &self,
        len: usize,
        head_deadline: Option<Instant>,
        now: Instant,
    ) -> EvictionDecision {
        if self.check_overflow(len).requires_eviction() {
            return EvictionDecision::EvictOverflow;
        }

        match head_deadline {
            Some(deadline) if deadline <= now => EvictionDecision::EvictExpired,
            _ => EvictionDecision::None,
        }
    }

    /// Window size.
    pub fn size(&self) -> usize {
        self.size
    }
}
