use crate::error::ConfigError;
use std::time::Duration;

/// Default lifetime for entries written without an explicit TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default in-process capacity (`MAX_MEMORY_ENTRIES`).
pub const MAX_MEMORY_ENTRIES: usize = 1_000;
/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default period of the stats/health refresh.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(300);
/// Upper bound on any single shared-store round trip.
pub const DEFAULT_SHARED_TIMEOUT: Duration = Duration::from_secs(2);
/// Namespace prepended to every shared-store key.
pub const DEFAULT_KEY_PREFIX: &str = "relaykit:";

/// Validated configuration for [`LayeredCache`](crate::cache::LayeredCache).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    key_prefix: String,
    default_ttl: Duration,
    max_memory_entries: usize,
    sweep_interval: Duration,
    stats_interval: Duration,
    shared_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
            max_memory_entries: MAX_MEMORY_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stats_interval: DEFAULT_STATS_INTERVAL,
            shared_timeout: DEFAULT_SHARED_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// Builder seeded with the defaults.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Defaults overridden by `CACHE_KEY_PREFIX`, `CACHE_DEFAULT_TTL_SECS` and
    /// `CACHE_MAX_MEMORY_ENTRIES`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(prefix) = lookup("CACHE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(raw) = lookup("CACHE_DEFAULT_TTL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.default_ttl = Duration::from_secs(secs),
                _ => tracing::warn!(
                    target: "relaykit::cache",
                    value = %raw,
                    "ignoring invalid CACHE_DEFAULT_TTL_SECS"
                ),
            }
        }
        if let Some(raw) = lookup("CACHE_MAX_MEMORY_ENTRIES") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_memory_entries = n,
                _ => tracing::warn!(
                    target: "relaykit::cache",
                    value = %raw,
                    "ignoring invalid CACHE_MAX_MEMORY_ENTRIES"
                ),
            }
        }
        config
    }

    /// Namespace prepended to shared-store keys.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// TTL for writes without one, and for shared hits promoted into memory.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// In-process capacity before LRU eviction.
    pub fn max_memory_entries(&self) -> usize {
        self.max_memory_entries
    }

    /// Period of the expiry sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Period of the stats/health refresh.
    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }

    /// Upper bound on one shared-store call.
    pub fn shared_timeout(&self) -> Duration {
        self.shared_timeout
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Namespace for shared-store keys, e.g. `relaykit:`.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// TTL used when a write does not pass one.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// In-process capacity; must be non-zero.
    pub fn max_memory_entries(mut self, n: usize) -> Self {
        self.config.max_memory_entries = n;
        self
    }

    /// Period of the expiry sweep.
    pub fn sweep_interval(mut self, period: Duration) -> Self {
        self.config.sweep_interval = period;
        self
    }

    /// Period of the stats/health refresh.
    pub fn stats_interval(mut self, period: Duration) -> Self {
        self.config.stats_interval = period;
        self
    }

    /// Upper bound on one shared-store call.
    pub fn shared_timeout(mut self, timeout: Duration) -> Self {
        self.config.shared_timeout = timeout;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        let c = self.config;
        if c.max_memory_entries == 0 {
            return Err(ConfigError::ZeroThreshold { field: "max_memory_entries", provided: 0 });
        }
        for (field, value) in [
            ("default_ttl", c.default_ttl),
            ("sweep_interval", c.sweep_interval),
            ("stats_interval", c.stats_interval),
            ("shared_timeout", c.shared_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field, provided: value });
            }
        }
        Ok(c)
    }
}
