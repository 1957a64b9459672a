//! Per-action timeout supervision
//!
//! Every `begin` arms a one-shot timer. When it fires the engine tries to
//! finalize the action as `TIMEOUT`; if normal completion got there first
//! the attempt is a no-op.
//!
//! The handle lives inside the action's store entry and is cancelled in the
//! same critical section that removes the entry, so a finalized action
//! never keeps a live timer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use paytrace_span::ActionId;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Cancellation handle for one armed timer
#[derive(Debug)]
pub struct TimeoutHandle {
    task: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl TimeoutHandle {
    /// Cancel the timer.
    ///
    /// A timer that has already fired is left alone: it is the one
    /// finalizing the action and must not be aborted mid-delivery.
    pub fn cancel(self) {
        if !self.fired.load(Ordering::Acquire) {
            self.task.abort();
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Schedules one-shot timers on the engine's runtime
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    runtime: Handle,
    duration: Duration,
}

impl TimeoutSupervisor {
    pub fn new(runtime: Handle, duration: Duration) -> Self {
        Self { runtime, duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Arm a timer that runs `on_expire(id)` once the budget elapses.
    ///
    /// Does not suspend; the timer runs as its own task.
    pub fn schedule<F, Fut>(&self, id: ActionId, on_expire: F) -> TimeoutHandle
    where
        F: FnOnce(ActionId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let duration = self.duration;

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            flag.store(true, Ordering::Release);
            tracing::debug!(action_id = %id, timeout_ms = duration.as_millis() as u64, "Action timeout fired");
            on_expire(id).await;
        });

        TimeoutHandle { task, fired }
    }
}
