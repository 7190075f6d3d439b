//! Recurring background task that rotates the access token before it expires.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Default cadence for proactive refresh: 6 days.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(6 * 24 * 60 * 60);

/// Longest accepted cadence: one year.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Owned handle to one spawned refresh task. Dropping it cancels the task.
#[derive(Debug)]
pub struct RefreshTimerHandle {
    id: u64,
    task: JoinHandle<()>,
}

impl RefreshTimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel future firings. A tick already running is aborted at its next
    /// suspension point; a request it already sent is not recalled.
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for RefreshTimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns at most one active `RefreshTimerHandle`.
pub struct SessionTimer {
    period: Duration,
    active: Mutex<Option<RefreshTimerHandle>>,
}

impl SessionTimer {
    /// `period` is clamped to between one second and `MAX_REFRESH_INTERVAL`.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL),
            active: Mutex::new(None),
        }
    }

    /// Stop any running timer, then spawn a task that calls `tick` every
    /// period, starting one period from now. The task ends when `tick`
    /// returns `ControlFlow::Break`. Returns the new handle's id.
    pub fn start<F, Fut>(&self, tick: F) -> u64
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let mut active = self.slot();
        if let Some(previous) = active.take() {
            debug!(handle = previous.id(), "Stopping previous refresh timer");
            previous.cancel();
        }

        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let period = self.period;
        let first = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(handle = id, "Refresh timer fired");
                if tick().await.is_break() {
                    debug!(handle = id, "Refresh timer finished");
                    break;
                }
            }
        });

        debug!(handle = id, period_secs = period.as_secs(), "Refresh timer started");
        *active = Some(RefreshTimerHandle { id, task });
        id
    }

    /// Cancel the running timer, if any. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(handle) = self.slot().take() {
            debug!(handle = handle.id(), "Refresh timer stopped");
            handle.cancel();
        }
    }

    /// Id of the active handle
    pub fn active_handle(&self) -> Option<u64> {
        self.slot().as_ref().map(RefreshTimerHandle::id)
    }

    /// True when a handle is held and its task has not ended
    pub fn is_running(&self) -> bool {
        self.slot().as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<RefreshTimerHandle>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_INTERVAL)
    }
}
