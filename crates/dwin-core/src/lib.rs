//! dwin core - deduplicating sliding window
//!
//! A bounded, time-limited buffer that coalesces bursts of duplicate events
//! by key and acts on each unique event once:
//!
//! - At most `size` unique events buffered, oldest evicted first
//! - Each event leaves after `duration` from its first arrival, or earlier on overflow
//! - Evicted events run their callback on a bounded worker pool
//!
//! ```no_run
//! use dwin_core::{async_trait, EventMeta, UniqueEvent, Window, WindowConfig};
//! use std::time::Duration;
//!
//! struct Alert(String);
//!
//! #[async_trait]
//! impl UniqueEvent for Alert {
//!     fn key(&self) -> &str {
//!         &self.0
//!     }
//!
//!     async fn listen(self, meta: EventMeta) {
//!         println!("{} fired {} extra times", self.0, meta.repeat_count);
//!     }
//! }
//!
//! # async fn demo() -> dwin_core::Result<()> {
//! let window = Window::new(
//!     WindowConfig::new()
//!         .with_size(100)
//!         .with_duration(Duration::from_secs(2)),
//! )?;
//! window.add(Alert("disk-full".into())).await?;
//! window.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod metrics;
pub mod window;

// Re-export commonly used types
pub use async_trait::async_trait;
pub use config::{Config, DispatchMode, WindowConfig};
pub use error::{DispatchError, WindowError};
pub use error::{Error, Result};
pub use event::{EventMeta, UniqueEvent};
pub use window::{AddOutcome, Rejected, Window, WindowStats};
