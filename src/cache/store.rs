use super::errors::CacheResult;
use super::memory::wildcard_match;
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Abstract interface to the shared, out-of-process cache layer (L2).
///
/// Values are opaque strings; [`LayeredCache`](crate::cache::LayeredCache)
/// stores serialized `(value, ttl)` records under namespaced keys.
/// Implementations report failures through [`CacheResult`]; the layered cache
/// turns every failure into a logged, degraded-mode miss.
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// Returns `Ok(Some(value))` on hit, `Ok(None)` on miss.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a specific key.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete all keys matching a `*` wildcard pattern, returning how many were removed.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> CacheResult<bool>;

    /// Release connections. Called once by [`LayeredCache::close`](crate::cache::LayeredCache::close).
    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }

    /// Short backend name used in logs.
    fn provider_name(&self) -> &'static str;
}

/// Process-local [`SharedStore`] with TTL support.
///
/// Useful for tests and single-instance deployments that still want the
/// layered code path exercised.
#[derive(Debug, Clone)]
pub struct InMemorySharedStore {
    // key -> (value, expires_at_millis)
    data: Arc<Mutex<HashMap<String, (String, u64)>>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySharedStore {
    /// Store expiring keys on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Store expiring keys on `clock`.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        let guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.values().filter(|(_, expires_at)| *expires_at > now).count()
    }

    /// Whether no live key remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored string for a key, ignoring expiry.
    pub fn raw(&self, key: &str) -> Option<String> {
        let guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).map(|(value, _)| value.clone())
    }
}

impl Default for InMemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = self.clock.now_millis();
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.get(key) {
            Some((_, expires_at)) if *expires_at <= now => {
                guard.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_millis().saturating_add(ttl_ms.max(1));
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|key, _| !wildcard_match(pattern, key));
        Ok((before - guard.len()) as u64)
    }

    async fn ping(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
