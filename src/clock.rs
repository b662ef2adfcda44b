//! Clock abstractions used by the cache and circuit breakers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Wall clock reporting milliseconds since the Unix epoch.
///
/// Default for breakers and caches: persisted breaker snapshots carry
/// timestamps that must stay meaningful after a process restart.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Notes: resets when the process restarts; do not pair it with snapshot
/// persistence.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at an arbitrary instant (millis).
    pub fn starting_at(millis: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(millis)) }
    }

    /// Move time forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
