//! Process-wide directory of named circuit breakers.
//!
//! One breaker per dependency name. The first caller decides the
//! configuration; later calls with different options get the existing
//! instance. Construct one registry at the composition root and share it
//! (it is cheap to clone).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::LayeredCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::presets;
use crate::task::PeriodicTask;
use crate::telemetry::LogListener;

/// Errors from registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No breaker is registered under this name.
    #[error("circuit breaker '{name}' not found")]
    NotFound {
        /// Name that could not be located.
        name: String,
    },
}

/// Aggregate health across all registered breakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryHealth {
    /// True when every breaker is CLOSED.
    pub healthy: bool,
    pub total: usize,
    pub open: Vec<String>,
    pub half_open: Vec<String>,
    pub breakers: BTreeMap<String, CircuitState>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    snapshots: Option<LayeredCache>,
    health_task: Mutex<Option<PeriodicTask>>,
}

/// Registry of named breakers. Clones share the same directory.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RegistryInner>,
}

impl CircuitBreakerRegistry {
    /// Registry without snapshot persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose breakers persist and restore snapshots through `cache`.
    pub fn with_snapshot_cache(cache: LayeredCache) -> Self {
        Self {
            inner: Arc::new(RegistryInner { snapshots: Some(cache), ..RegistryInner::default() }),
        }
    }

    /// Registry preloaded with the email provider breakers from [`presets`].
    pub async fn with_email_providers() -> Self {
        let registry = Self::new();
        registry.register_email_providers().await;
        registry
    }

    /// Create the email provider breakers that do not exist yet.
    pub async fn register_email_providers(&self) {
        for (name, config) in presets::email_providers() {
            self.get_circuit_breaker(name, Some(config)).await;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CircuitBreaker>> {
        self.inner.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the breaker for `name`, creating it on first use.
    ///
    /// `config` is used only when the breaker is created; subsequent calls
    /// return the existing instance and ignore it. A new breaker gets a
    /// logging listener and is restored from its persisted snapshot if one
    /// exists.
    pub async fn get_circuit_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> CircuitBreaker {
        if let Some(existing) = self.read().get(name).cloned() {
            return existing;
        }

        let mut builder =
            CircuitBreaker::builder(name, config.unwrap_or_default()).listener(Arc::new(LogListener));
        if let Some(cache) = &self.inner.snapshots {
            builder = builder.snapshot_cache(cache.clone());
        }
        let created = builder.build();
        let restored = created.restore().await;

        let mut map = self.inner.breakers.write().unwrap_or_else(PoisonError::into_inner);
        // Another task may have registered the name while we were restoring.
        if let Some(existing) = map.get(name) {
            return existing.clone();
        }
        map.insert(name.to_string(), created.clone());
        info!(
            target: "relaykit::circuit_breaker_registry",
            breaker = %name,
            restored,
            "circuit breaker registered"
        );
        created
    }

    /// Register a prebuilt breaker under its own name.
    ///
    /// If the name is taken, the existing breaker is kept and returned.
    pub fn register(&self, breaker: CircuitBreaker) -> CircuitBreaker {
        let mut map = self.inner.breakers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(breaker.name()) {
            warn!(
                target: "relaykit::circuit_breaker_registry",
                breaker = %breaker.name(),
                "circuit breaker already registered; keeping existing instance"
            );
            return existing.clone();
        }
        breaker.add_listener(Arc::new(LogListener));
        map.insert(breaker.name().to_string(), breaker.clone());
        breaker
    }

    /// Existing breaker for `name`, without creating one.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no breaker is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn breakers(&self) -> Vec<CircuitBreaker> {
        self.read().values().cloned().collect()
    }

    /// Stats for every breaker, keyed by name.
    pub fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers().into_iter().map(|b| (b.name().to_string(), b.stats())).collect()
    }

    /// Healthy when every breaker is CLOSED.
    pub fn get_health_status(&self) -> RegistryHealth {
        let breakers: BTreeMap<String, CircuitState> =
            self.breakers().into_iter().map(|b| (b.name().to_string(), b.state())).collect();
        let open: Vec<String> = breakers
            .iter()
            .filter(|(_, s)| **s == CircuitState::Open)
            .map(|(n, _)| n.clone())
            .collect();
        let half_open: Vec<String> = breakers
            .iter()
            .filter(|(_, s)| **s == CircuitState::HalfOpen)
            .map(|(n, _)| n.clone())
            .collect();
        RegistryHealth {
            healthy: open.is_empty() && half_open.is_empty(),
            total: breakers.len(),
            open,
            half_open,
            breakers,
        }
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers() {
            breaker.reset();
        }
        info!(target: "relaykit::circuit_breaker_registry", "all circuit breakers reset");
    }

    /// Reset one breaker.
    pub fn reset(&self, name: &str) -> Result<(), RegistryError> {
        self.get(name)
            .map(|b| b.reset())
            .ok_or_else(|| RegistryError::NotFound { name: name.to_string() })
    }

    /// Manual kill-switch for one dependency.
    pub fn force_open(&self, name: &str) -> Result<(), RegistryError> {
        self.get(name)
            .map(|b| b.force_open())
            .ok_or_else(|| RegistryError::NotFound { name: name.to_string() })
    }

    /// Names of breakers that are not CLOSED, logged at `warn`.
    pub fn log_unhealthy(&self) -> Vec<String> {
        let health = self.get_health_status();
        let unhealthy: Vec<String> =
            health.open.iter().chain(health.half_open.iter()).cloned().collect();
        if unhealthy.is_empty() {
            debug!(target: "relaykit::circuit_breaker_registry", total = health.total, "all circuit breakers closed");
        } else {
            warn!(
                target: "relaykit::circuit_breaker_registry",
                unhealthy = ?unhealthy,
                "circuit breakers not closed"
            );
        }
        unhealthy
    }

    /// Scan breakers every `period` and log the ones that are not CLOSED.
    pub fn start_health_check(&self, period: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let task = PeriodicTask::spawn("breaker-health", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    CircuitBreakerRegistry { inner }.log_unhealthy();
                }
            }
        });
        *self.inner.health_task.lock().unwrap_or_else(PoisonError::into_inner) = task;
    }

    /// Stop the periodic health scan, if running.
    pub fn stop_health_check(&self) {
        if let Some(task) = self.inner.health_task.lock().unwrap_or_else(PoisonError::into_inner).take()
        {
            task.shutdown();
        }
    }
}
