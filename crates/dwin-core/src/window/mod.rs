//! Sliding window engine.
//!
//! [`Window`] ties together the pieces below:
//!
//! - [`DedupIndex`]: key to buffered entry, decides new vs duplicate
//! - [`FifoQueue`]: first-arrival order of buffered keys
//! - [`EvictionChecker`]: whether the head must leave, and why
//! - [`ExpirationTimer`]: fires when the head's deadline passes

mod eviction;
mod index;
mod queue;
mod sliding;
mod timer;

pub use eviction::{EvictionChecker, EvictionDecision, EvictionReason};
pub use index::{BufferedEntry, DedupIndex, InsertOutcome};
pub use queue::{FifoQueue, QueueSlot};
pub use sliding::{AddOutcome, Rejected, Window, WindowStats};
pub use timer::{ExpirationTimer, TimerState};
