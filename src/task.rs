//! Owned, cancelable background tasks.
//!
//! Cache sweeps, breaker history pruning and registry health scans run on a
//! fixed interval. Each loop is tied to a [`PeriodicTask`] handle held by its
//! owner; dropping the handle or calling [`PeriodicTask::shutdown`] stops it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a spawned interval loop.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period` on the current tokio runtime.
    ///
    /// The first tick fires one full period after spawning. Returns `None` when
    /// called outside a runtime; the owner then simply runs without the task.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    target: "relaykit::task",
                    task = name,
                    "no tokio runtime available; periodic task not started"
                );
                return None;
            }
        };
        let period = period.max(Duration::from_millis(1));
        let handle = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        tracing::debug!(target: "relaykit::task", task = name, ?period, "periodic task started");
        Some(Self { name, handle })
    }

    /// Task label used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop has stopped (aborted or panicked).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop. Idempotent.
    pub fn shutdown(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
            tracing::debug!(target: "relaykit::task", task = self.name, "periodic task stopped");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
