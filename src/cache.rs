//! Two-tier cache: an in-process layer (L1) in front of an optional shared store (L2).
//!
//! ## Architecture
//!
//! ```text
//! LayeredCache
//!   ├── MemoryLayer            <- TTL + strict LRU on last access, bounded
//!   └── Option<SharedStore>    <- e.g. Redis; namespaced keys, best-effort
//! ```
//!
//! - **Reads** check L1, then L2; an L2 hit is promoted into L1 with the
//!   default TTL.
//! - **Writes** land in L1 synchronously and in L2 best-effort.
//! - **Degraded mode**: any L2 failure (connect, timeout, command error) is
//!   logged at `warn` and treated as a miss/no-op. Callers never see it.
//! - `get_or_set` does not de-duplicate concurrent cold reads: two tasks
//!   racing on the same missing key may both run their fetcher.
//!
//! ```rust
//! use relaykit::cache::{CacheConfig, LayeredCache};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = LayeredCache::new(CacheConfig::default());
//! cache.set("toggle:email", &true, None).await.unwrap();
//! assert_eq!(cache.get::<bool>("toggle:email").await, Some(true));
//! # }
//! ```

pub mod config;
pub mod errors;
pub(crate) mod memory;
pub mod stats;
pub mod store;

pub use config::{CacheConfig, CacheConfigBuilder, MAX_MEMORY_ENTRIES};
pub use errors::{CacheError, CacheResult};
pub use memory::CacheEntry;
pub use stats::{CacheHealth, CacheStats, SharedHealth};
pub use store::{InMemorySharedStore, SharedStore};

use crate::clock::{Clock, SystemClock};
use crate::task::PeriodicTask;
use memory::MemoryLayer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stats::CacheCounters;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Record written to the shared store: the value plus its TTL in seconds.
#[derive(Debug, Serialize, Deserialize)]
struct SharedRecord {
    value: Value,
    ttl: u64,
}

#[derive(Debug)]
struct CacheInner {
    config: CacheConfig,
    memory: Mutex<MemoryLayer<Value>>,
    shared: RwLock<Option<Arc<dyn SharedStore>>>,
    counters: CacheCounters,
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

/// Layered cache handle. Clones share the same layers and counters.
#[derive(Debug, Clone)]
pub struct LayeredCache {
    inner: Arc<CacheInner>,
}

/// Builder for [`LayeredCache`].
#[derive(Debug)]
pub struct LayeredCacheBuilder {
    config: CacheConfig,
    shared: Option<Arc<dyn SharedStore>>,
    clock: Arc<dyn Clock>,
}

impl LayeredCacheBuilder {
    /// Attach a shared store (L2).
    pub fn shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared = Some(store);
        self
    }

    /// Attach an optional shared store; `None` keeps the cache in-process only.
    pub fn maybe_shared_store(mut self, store: Option<Arc<dyn SharedStore>>) -> Self {
        self.shared = store;
        self
    }

    /// Override the clock (useful for deterministic TTL tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Finish the cache. Background maintenance is not started.
    pub fn build(self) -> LayeredCache {
        match &self.shared {
            Some(store) => debug!(
                target: "relaykit::cache",
                provider = store.provider_name(),
                "layered cache initialized with shared store"
            ),
            None => debug!(target: "relaykit::cache", "layered cache initialized in-process only"),
        }
        LayeredCache {
            inner: Arc::new(CacheInner {
                memory: Mutex::new(MemoryLayer::new(self.config.max_memory_entries())),
                config: self.config,
                shared: RwLock::new(self.shared),
                counters: CacheCounters::default(),
                clock: self.clock,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl LayeredCache {
    /// In-process-only cache.
    pub fn new(config: CacheConfig) -> Self {
        Self::builder(config).build()
    }

    /// Builder for a cache with a shared store or a custom clock.
    pub fn builder(config: CacheConfig) -> LayeredCacheBuilder {
        LayeredCacheBuilder { config, shared: None, clock: Arc::new(SystemClock) }
    }

    /// Configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Whether a shared store is currently attached.
    pub fn has_shared_store(&self) -> bool {
        self.shared_store().is_some()
    }

    fn memory(&self) -> MutexGuard<'_, MemoryLayer<Value>> {
        self.inner.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shared_store(&self) -> Option<Arc<dyn SharedStore>> {
        self.inner.shared.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.inner.config.key_prefix(), key)
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    /// Run one shared-store call under the configured timeout, absorbing failures.
    async fn shared_call<T, F>(&self, op: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        match tokio::time::timeout(self.inner.config.shared_timeout(), fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                CacheCounters::bump(&self.inner.counters.shared_errors);
                warn!(
                    target: "relaykit::cache",
                    op,
                    key,
                    error = %err,
                    "shared cache operation failed; continuing in-process only"
                );
                None
            }
            Err(_) => {
                CacheCounters::bump(&self.inner.counters.shared_errors);
                warn!(
                    target: "relaykit::cache",
                    op,
                    key,
                    timeout = ?self.inner.config.shared_timeout(),
                    "shared cache operation timed out; continuing in-process only"
                );
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(err) => {
                debug!(
                    target: "relaykit::cache",
                    key,
                    error = %err,
                    "cached value does not match requested type; treating as miss"
                );
                None
            }
        }
    }

    /// Look up `key`, checking the in-process layer first, then the shared store.
    ///
    /// Returns `None` on a total miss, on a shared-store failure, or when the
    /// cached value cannot be decoded as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.now();
        let local = self.memory().get(key, now);
        if let Some(value) = local {
            CacheCounters::bump(&self.inner.counters.memory_hits);
            return Self::decode(key, value);
        }
        CacheCounters::bump(&self.inner.counters.memory_misses);

        let store = self.shared_store()?;
        let raw = match self.shared_call("get", key, store.get(&self.namespaced(key))).await {
            Some(Some(raw)) => raw,
            _ => {
                CacheCounters::bump(&self.inner.counters.shared_misses);
                return None;
            }
        };

        let record: SharedRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                CacheCounters::bump(&self.inner.counters.shared_misses);
                warn!(
                    target: "relaykit::cache",
                    key,
                    error = %err,
                    "unreadable shared cache record; treating as miss"
                );
                return None;
            }
        };
        CacheCounters::bump(&self.inner.counters.shared_hits);

        let default_ttl = self.inner.config.default_ttl();
        let evicted = self.memory().insert(key, record.value.clone(), default_ttl, self.now());
        self.note_eviction(evicted);
        Self::decode(key, record.value)
    }

    /// Store `value` under `key` for `ttl` (default TTL when `None`).
    ///
    /// The in-process write happens before this returns; the shared write is
    /// best-effort. Fails only if `value` cannot be serialized.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let value = serde_json::to_value(value)?;
        let ttl = ttl.unwrap_or_else(|| self.inner.config.default_ttl());

        let store = self.shared_store();
        let record = match &store {
            Some(_) => Some(serde_json::to_string(&SharedRecord {
                value: value.clone(),
                ttl: ttl.as_secs(),
            })?),
            None => None,
        };

        let evicted = self.memory().insert(key, value, ttl, self.now());
        self.note_eviction(evicted);
        CacheCounters::bump(&self.inner.counters.sets);

        if let (Some(store), Some(record)) = (store, record) {
            self.shared_call("set", key, store.set(&self.namespaced(key), &record, ttl)).await;
        }
        Ok(())
    }

    fn note_eviction(&self, evicted: Option<String>) {
        if let Some(victim) = evicted {
            CacheCounters::bump(&self.inner.counters.evictions);
            debug!(target: "relaykit::cache", key = %victim, "evicted least recently used entry");
        }
    }

    /// Remove `key` from both layers. Returns whether the in-process layer held it.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.memory().remove(key);
        CacheCounters::bump(&self.inner.counters.deletes);
        if let Some(store) = self.shared_store() {
            self.shared_call("delete", key, store.delete(&self.namespaced(key))).await;
        }
        removed
    }

    /// Remove every key matching a `*` wildcard pattern from both layers.
    ///
    /// Returns the number of in-process entries removed; the shared-store
    /// count is logged.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let removed = self.memory().remove_matching(pattern);
        CacheCounters::add(&self.inner.counters.deletes, removed as u64);

        if let Some(store) = self.shared_store() {
            let shared_pattern = self.namespaced(pattern);
            if let Some(count) =
                self.shared_call("invalidate", pattern, store.delete_pattern(&shared_pattern)).await
            {
                debug!(
                    target: "relaykit::cache",
                    pattern,
                    memory = removed,
                    shared = count,
                    "invalidated cache keys"
                );
            }
        }
        removed
    }

    /// Read-through lookup: return the cached value or compute, store and return it.
    ///
    /// Fetcher errors are returned unchanged and nothing is cached. A value
    /// that cannot be serialized is still returned, just not cached.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }
        let value = fetcher().await?;
        if let Err(err) = self.set(key, &value, ttl).await {
            warn!(target: "relaykit::cache", key, error = %err, "fetched value not cached");
        }
        Ok(value)
    }

    /// Remove expired in-process entries now. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.now();
        self.memory().sweep(now)
    }

    /// Inspect an in-process entry without refreshing its access time.
    pub fn peek_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        self.memory().peek(key).cloned()
    }

    /// Counter snapshot plus the current in-process size.
    pub fn stats(&self) -> CacheStats {
        let size = self.memory().len();
        self.inner.counters.snapshot(size)
    }

    /// In-process layer is always healthy; the shared layer is pinged.
    pub async fn health_check(&self) -> CacheHealth {
        let shared = match self.shared_store() {
            None => SharedHealth::Disabled,
            Some(store) => match self.shared_call("ping", "-", store.ping()).await {
                Some(true) => SharedHealth::Healthy,
                _ => SharedHealth::Unhealthy,
            },
        };
        CacheHealth { memory: true, shared }
    }

    /// Start the expiry sweep and the stats/health refresh on their configured intervals.
    ///
    /// Tasks hold only a weak reference to the cache and are stopped by
    /// [`close`](Self::close). Calling this twice replaces the running tasks.
    pub fn start_maintenance(&self) {
        let mut started = Vec::new();

        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        if let Some(task) =
            PeriodicTask::spawn("cache-sweep", self.inner.config.sweep_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let cache = LayeredCache { inner };
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(target: "relaykit::cache", removed, "swept expired entries");
                        }
                    }
                }
            })
        {
            started.push(task);
        }

        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        if let Some(task) =
            PeriodicTask::spawn("cache-stats", self.inner.config.stats_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        let cache = LayeredCache { inner };
                        let stats = cache.stats();
                        let health = cache.health_check().await;
                        if health.shared == SharedHealth::Unhealthy {
                            warn!(target: "relaykit::cache", "shared cache store failed health ping");
                        }
                        debug!(
                            target: "relaykit::cache",
                            memory_size = stats.memory_size,
                            hit_rate = stats.hit_rate,
                            memory_hits = stats.memory_hits,
                            shared_hits = stats.shared_hits,
                            shared_errors = stats.shared_errors,
                            "cache stats"
                        );
                    }
                }
            })
        {
            started.push(task);
        }

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for old in tasks.drain(..) {
            old.shutdown();
        }
        *tasks = started;
    }

    /// Stop background tasks, close and detach the shared store, clear the in-process layer.
    pub async fn close(&self) {
        let tasks: Vec<PeriodicTask> = {
            let mut guard = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for task in &tasks {
            task.shutdown();
        }

        let store = self.inner.shared.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(store) = store {
            self.shared_call("close", "-", store.close()).await;
        }
        self.memory().clear();
        debug!(target: "relaykit::cache", "layered cache closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_log::LogBuffer;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl SharedStore for DownStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::ConnectionError("refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::ConnectionError("refused".into()))
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::ConnectionError("refused".into()))
        }
        async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
            Err(CacheError::ConnectionError("refused".into()))
        }
        async fn ping(&self) -> CacheResult<bool> {
            Err(CacheError::ConnectionError("refused".into()))
        }
        fn provider_name(&self) -> &'static str {
            "down"
        }
    }

    fn small_config(entries: usize) -> CacheConfig {
        CacheConfig::builder().max_memory_entries(entries).build().unwrap()
    }

    #[tokio::test]
    async fn set_then_get_until_ttl_elapses() {
        let clock = ManualClock::starting_at(1_000);
        let cache = LayeredCache::builder(CacheConfig::default()).clock(clock.clone()).build();

        cache.set("k", &"v", Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        clock.advance(2_001);
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn shared_hit_is_promoted_with_default_ttl() {
        let clock = ManualClock::new();
        let shared = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
        let writer = LayeredCache::builder(CacheConfig::default())
            .shared_store(shared.clone())
            .clock(clock.clone())
            .build();
        writer.set("org:1", &42u32, Some(Duration::from_secs(3_600))).await.unwrap();
        assert!(shared.raw("relaykit:org:1").is_some());

        let reader = LayeredCache::builder(CacheConfig::default())
            .shared_store(shared.clone())
            .clock(clock.clone())
            .build();
        assert_eq!(reader.get::<u32>("org:1").await, Some(42));

        let promoted = reader.peek_entry("org:1").expect("promoted into memory");
        assert_eq!(promoted.ttl, CacheConfig::default().default_ttl());

        let stats = reader.stats();
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.shared_hits, 1);
        assert_eq!(reader.get::<u32>("org:1").await, Some(42));
        assert_eq!(reader.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn shared_failures_degrade_silently() {
        let cache = LayeredCache::builder(CacheConfig::default())
            .shared_store(Arc::new(DownStore))
            .build();

        cache.set("k", &1u8, None).await.unwrap();
        assert_eq!(cache.get::<u8>("k").await, Some(1));
        assert_eq!(cache.get::<u8>("missing").await, None);
        assert!(cache.delete("k").await);
        assert_eq!(cache.invalidate("*").await, 0);

        let health = cache.health_check().await;
        assert_eq!(health.shared, SharedHealth::Unhealthy);
        assert!(health.memory);
        assert!(cache.stats().shared_errors >= 4);
    }

    #[derive(Debug)]
    struct StalledStore;

    #[async_trait]
    impl SharedStore for StalledStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }
        async fn delete_pattern(&self, _pattern: &str) -> CacheResult<u64> {
            Ok(0)
        }
        async fn ping(&self) -> CacheResult<bool> {
            Ok(true)
        }
        fn provider_name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn shared_failures_are_logged_at_warn() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let cache = LayeredCache::builder(CacheConfig::default())
            .shared_store(Arc::new(DownStore))
            .build();
        cache.set("org:7", &1u8, None).await.unwrap();
        assert_eq!(cache.get::<u8>("absent").await, None);

        let logs = logs.contents();
        let failures: Vec<&str> = logs
            .lines()
            .filter(|line| line.contains("shared cache operation failed"))
            .collect();
        assert_eq!(failures.len(), 2, "logs: {logs}");
        assert!(failures.iter().all(|line| line.contains("WARN")));
        assert!(failures.iter().all(|line| line.contains("relaykit::cache")));
        assert!(failures[0].contains("op=\"set\"") && failures[0].contains("org:7"));
        assert!(failures[1].contains("op=\"get\"") && failures[1].contains("Cache connection error"));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_timeouts_are_logged_at_warn() {
        let logs = LogBuffer::default();
        let _guard = logs.install();

        let cache = LayeredCache::builder(CacheConfig::default())
            .shared_store(Arc::new(StalledStore))
            .build();
        assert_eq!(cache.get::<u8>("k").await, None);
        assert_eq!(cache.stats().shared_errors, 1);

        let logs = logs.contents();
        let line = logs
            .lines()
            .find(|line| line.contains("shared cache operation timed out"))
            .unwrap_or_else(|| panic!("logs: {logs}"));
        assert!(line.contains("WARN"));
    }

    #[tokio::test]
    async fn wrong_type_reads_as_miss() {
        let cache = LayeredCache::new(CacheConfig::default());
        cache.set("k", &"text", None).await.unwrap();
        assert_eq!(cache.get::<u64>("k").await, None);
    }

    #[tokio::test]
    async fn eviction_is_counted() {
        let cache = LayeredCache::new(small_config(1));
        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.memory_size, 1);
    }

    #[tokio::test]
    async fn get_or_set_does_not_cache_errors() {
        let cache = LayeredCache::new(CacheConfig::default());
        let failed: Result<u32, &str> = cache.get_or_set("k", || async { Err("db down") }, None).await;
        assert_eq!(failed, Err("db down"));
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn close_detaches_store_and_clears_memory() {
        let shared = Arc::new(InMemorySharedStore::new());
        let cache = LayeredCache::builder(CacheConfig::default()).shared_store(shared).build();
        cache.start_maintenance();
        cache.set("k", &1, None).await.unwrap();

        cache.close().await;
        assert!(!cache.has_shared_store());
        assert_eq!(cache.stats().memory_size, 0);
        assert_eq!(cache.health_check().await.shared, SharedHealth::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_sweeps_expired_entries() {
        let clock = ManualClock::new();
        let config = CacheConfig::builder()
            .sweep_interval(Duration::from_secs(10))
            .build()
            .unwrap();
        let cache = LayeredCache::builder(config).clock(clock.clone()).build();
        cache.set("short", &1, Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", &2, Some(Duration::from_secs(600))).await.unwrap();
        cache.start_maintenance();

        clock.advance(5_000);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(cache.stats().memory_size, 1);
        assert!(cache.peek_entry("long").is_some());
        cache.close().await;
    }
}
