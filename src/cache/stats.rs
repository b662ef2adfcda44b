use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative cache counters, updated lock-free on the request path.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) memory_hits: AtomicU64,
    pub(crate) memory_misses: AtomicU64,
    pub(crate) shared_hits: AtomicU64,
    pub(crate) shared_misses: AtomicU64,
    pub(crate) shared_errors: AtomicU64,
    pub(crate) sets: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, memory_size: usize) -> CacheStats {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let memory_misses = self.memory_misses.load(Ordering::Relaxed);
        let shared_hits = self.shared_hits.load(Ordering::Relaxed);
        let lookups = memory_hits + memory_misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (memory_hits + shared_hits) as f64 / lookups as f64
        };
        CacheStats {
            memory_hits,
            memory_misses,
            shared_hits,
            shared_misses: self.shared_misses.load(Ordering::Relaxed),
            shared_errors: self.shared_errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            memory_size,
            hit_rate,
        }
    }
}

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub shared_hits: u64,
    pub shared_misses: u64,
    /// Shared-store calls that failed or timed out.
    pub shared_errors: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// Live plus not-yet-swept entries in the in-process layer.
    pub memory_size: usize,
    /// Fraction of `get` calls answered by either layer.
    pub hit_rate: f64,
}

/// Health of the shared layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedHealth {
    /// No shared store configured; the cache is in-process only.
    Disabled,
    Healthy,
    Unhealthy,
}

/// Result of [`LayeredCache::health_check`](crate::cache::LayeredCache::health_check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHealth {
    /// The in-process layer is always available.
    pub memory: bool,
    pub shared: SharedHealth,
}

impl CacheHealth {
    /// Healthy unless a configured shared store failed its ping.
    pub fn is_healthy(&self) -> bool {
        self.memory && self.shared != SharedHealth::Unhealthy
    }
}
