//! Bounded worker pool for eviction callbacks.
//!
//! Each callback runs on its own tokio task while holding one of `pool_size`
//! semaphore permits, so at most `pool_size` callbacks run at once. What
//! happens when every permit is taken depends on the [`DispatchMode`]:
//! `Block` waits for a permit (back-pressuring the caller), `Drop` and
//! `Report` fail fast with [`DispatchError::Saturated`].

use crate::config::{DispatchMode, WindowConfig};
use crate::DispatchError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Largest accepted pool size.
pub const MAX_POOL_SIZE: usize = 1 << 16;

/// A reserved worker. Dropping it without spawning frees the worker.
#[derive(Debug)]
pub struct WorkerSlot {
    permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    /// Run `task` on the reserved worker.
    pub fn spawn<F>(self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            task.await;
            drop(permit);
        })
    }
}

/// Fixed-size callback pool.
#[derive(Debug)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    pool_size: usize,
    mode: DispatchMode,
    accepting: AtomicBool,
}

impl Dispatcher {
    /// Create a pool of `pool_size` workers.
    pub fn new(pool_size: usize, mode: DispatchMode) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            mode,
            accepting: AtomicBool::new(true),
        }
    }

    /// Create a pool from window settings.
    pub fn from_config(config: &WindowConfig) -> Self {
        Self::new(config.pool_size, config.dispatch_mode)
    }

    /// Reserve a worker according to the dispatch mode.
    pub async fn reserve(&self) -> Result<WorkerSlot, DispatchError> {
        if !self.is_accepting() {
            return Err(DispatchError::Closed);
        }

        let permit = match self.mode {
            DispatchMode::Block => Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| DispatchError::Closed)?,
            DispatchMode::Drop | DispatchMode::Report => Arc::clone(&self.permits)
                .try_acquire_owned()
                .map_err(|err| match err {
                    TryAcquireError::NoPermits => DispatchError::Saturated {
                        pool_size: self.pool_size,
                    },
                    TryAcquireError::Closed => DispatchError::Closed,
                })?,
        };

        // Release may have started while we waited for the permit
        if !self.is_accepting() {
            return Err(DispatchError::Closed);
        }

        Ok(WorkerSlot { permit })
    }

    /// Reserve a worker and run `task` on it.
    pub async fn submit<F>(&self, task: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reserve().await?.spawn(task);
        Ok(())
    }

    /// Stop accepting work and wait for running callbacks to finish.
    ///
    /// Idempotent; only the first call waits.
    pub async fn release(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }

        let in_flight = self.in_flight();
        debug!(in_flight, "Draining worker pool");

        // Holding every permit means no callback is running
        let drained = self.permits.acquire_many(self.pool_size as u32).await;
        self.permits.close();
        drop(drained);

        info!(pool_size = self.pool_size, "Worker pool released");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Workers currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Callbacks currently running.
    pub fn in_flight(&self) -> usize {
        self.pool_size.saturating_sub(self.available())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }
}
