//! Re-armable expiration timer.
//!
//! One background task sleeps until the current deadline. The deadline lives
//! in a watch channel, so re-arming is a non-blocking send that can be done
//! while the queue lock is held.

use parking_lot::Mutex;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Timer state shared with the background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Nothing to wait for
    Disarmed,
    /// Fire at the given instant
    Armed(Instant),
    /// Stopped for good
    Cancelled,
}

/// Single logical timer driving expiry evictions.
pub struct ExpirationTimer {
    state: watch::Sender<TimerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpirationTimer {
    /// Spawn the timer task on `runtime`.
    ///
    /// `on_fire` runs each time the armed deadline passes; returning `false`
    /// stops the task. It is expected to re-arm (or disarm) the timer.
    pub fn spawn<F, Fut>(runtime: &Handle, on_fire: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (state, rx) = watch::channel(TimerState::Disarmed);
        let handle = runtime.spawn(run(rx, on_fire));
        Self {
            state,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Fire at `deadline`; fires immediately if it already passed.
    pub fn arm_at(&self, deadline: Instant) {
        self.set(TimerState::Armed(deadline));
    }

    pub fn disarm(&self) {
        self.set(TimerState::Disarmed);
    }

    /// Arm against a head deadline, or disarm when there is no head.
    pub fn rearm(&self, head_deadline: Option<Instant>) {
        match head_deadline {
            Some(deadline) => self.arm_at(deadline),
            None => self.disarm(),
        }
    }

    /// Currently armed deadline.
    pub fn deadline(&self) -> Option<Instant> {
        match *self.state.borrow() {
            TimerState::Armed(deadline) => Some(deadline),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow() == TimerState::Cancelled
    }

    /// Stop the task without waiting for it.
    pub fn shutdown(&self) {
        self.state.send_replace(TimerState::Cancelled);
    }

    /// Stop the task and wait until an in-progress fire completes.
    pub async fn cancel(&self) {
        self.shutdown();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // Every call notifies the task, even with an unchanged deadline.
    fn set(&self, next: TimerState) {
        self.state.send_if_modified(|state| {
            if *state == TimerState::Cancelled {
                return false;
            }
            *state = next;
            true
        });
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run<F, Fut>(mut rx: watch::Receiver<TimerState>, mut on_fire: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        let state = *rx.borrow_and_update();
        match state {
            TimerState::Cancelled => break,
            TimerState::Disarmed => {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            TimerState::Armed(deadline) => {
                let fired = tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => Ok(true),
                    changed = rx.changed() => changed.map(|_| false),
                };
                match fired {
                    Err(_) => break,
                    Ok(false) => {}
                    Ok(true) => {
                        trace!("Expiration timer fired");
                        if !on_fire().await {
                            break;
                        }
                        // A fire consumes the deadline until the next notification
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("Expiration timer stopped");
}
