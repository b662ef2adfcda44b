//! Circuit breaker with a sliding call window and persisted snapshots.
//!
//! State machine:
//!
//! ```text
//!            trip (count / failure rate / slow rate)
//!   CLOSED ──────────────────────────────────────────▶ OPEN
//!     ▲                                                 │
//!     │ probe succeeds                recovery_timeout  │
//!     │                                       elapsed   ▼
//!     └──────────────────── HALF_OPEN ◀─────────────────┘
//!                              │ probe fails
//!                              └──────────────▶ OPEN
//! ```
//!
//! - CLOSED trips once the window holds at least `volume_threshold` calls and
//!   either the failure count reaches `failure_threshold`, the windowed failure
//!   rate reaches 50%, or the slow-call rate reaches `slow_call_rate_threshold`.
//! - OPEN rejects calls with [`BreakerError::Open`] without invoking them.
//!   Rejections are not recorded in the breaker's own stats.
//! - HALF_OPEN admits up to `half_open_max_calls` concurrent probes.
//! - Errors matching the configured expected-error patterns count as successes.
//! - With a snapshot cache attached, state is written after every call under
//!   `circuit-breaker:<name>` and can be restored after a restart.
//!
//! ```rust
//! use relaykit::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::io;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(1)
//!     .volume_threshold(1)
//!     .build()
//!     .unwrap();
//! let breaker = CircuitBreaker::new("resend", config);
//!
//! let res = breaker
//!     .execute(|| async { Err::<(), _>(io::Error::new(io::ErrorKind::Other, "502")) })
//!     .await;
//! assert!(matches!(res, Err(BreakerError::Inner(_))));
//! assert_eq!(breaker.state(), CircuitState::Open);
//! # }
//! ```

pub mod config;
mod layer;

pub use config::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, ExpectedErrorPredicate, SNAPSHOT_TTL,
};
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};

use crate::cache::LayeredCache;
use crate::clock::{Clock, SystemClock};
use crate::error::BreakerError;
use crate::task::PeriodicTask;
use crate::telemetry::{BreakerEvent, BreakerListener};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Most call records a breaker keeps in its window and in a persisted snapshot.
pub const MAX_WINDOW_CALLS: usize = 100;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Rejecting calls until the recovery timeout elapses.
    Open,
    /// Admitting a limited number of probe calls to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Wire name, e.g. `HALF_OPEN`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded call in the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Succeeded, or failed with an expected error.
    pub success: bool,
    pub duration_ms: u64,
    /// Completion time (clock millis).
    pub timestamp: u64,
}

/// Point-in-time view of a breaker, recomputed from the pruned window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Failures since the breaker last closed.
    pub failure_count: usize,
    pub success_count: usize,
    pub total_calls: u64,
    pub last_failure_time: Option<u64>,
    pub last_state_change: u64,
    /// Calls currently in the monitoring window, at most [`MAX_WINDOW_CALLS`].
    pub window_calls: usize,
    pub failure_rate: f64,
    pub average_response_time_ms: f64,
    pub slow_call_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BreakerSnapshot {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    total_calls: u64,
    last_failure_time: Option<u64>,
    last_state_change: u64,
    history: Vec<CallRecord>,
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    total_calls: u64,
    last_failure_time: Option<u64>,
    last_state_change: u64,
    history: VecDeque<CallRecord>,
    half_open_in_flight: usize,
}

impl Core {
    fn new(now: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            last_failure_time: None,
            last_state_change: now,
            history: VecDeque::new(),
            half_open_in_flight: 0,
        }
    }

    fn push(&mut self, call: CallRecord) {
        self.history.push_back(call);
        while self.history.len() > MAX_WINDOW_CALLS {
            self.history.pop_front();
        }
    }

    fn prune(&mut self, now: u64, window_ms: u64) -> usize {
        let before = self.history.len();
        while let Some(front) = self.history.front() {
            if now.saturating_sub(front.timestamp) > window_ms {
                self.history.pop_front();
            } else {
                break;
            }
        }
        before - self.history.len()
    }

    /// Move to `to`, returning the edge taken (if any).
    fn transition(&mut self, to: CircuitState, now: u64) -> Option<(CircuitState, CircuitState)> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.last_state_change = now;
        self.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            self.failure_count = 0;
        }
        Some((from, to))
    }

    fn failure_rate(&self) -> f64 {
        rate(self.history.iter().filter(|c| !c.success).count(), self.history.len())
    }

    fn slow_call_rate(&self, slow_ms: u64) -> f64 {
        rate(self.history.iter().filter(|c| c.duration_ms > slow_ms).count(), self.history.len())
    }

    fn average_response_time(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let total: u64 = self.history.iter().map(|c| c.duration_ms).sum();
        total as f64 / self.history.len() as f64
    }

    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            total_calls: self.total_calls,
            last_failure_time: self.last_failure_time,
            last_state_change: self.last_state_change,
            history: self
                .history
                .iter()
                .skip(self.history.len().saturating_sub(MAX_WINDOW_CALLS))
                .copied()
                .collect(),
        }
    }

    fn restore(&mut self, snapshot: BreakerSnapshot) {
        self.state = snapshot.state;
        self.failure_count = snapshot.failure_count;
        self.success_count = snapshot.success_count;
        self.total_calls = snapshot.total_calls;
        self.last_failure_time = snapshot.last_failure_time;
        self.last_state_change = snapshot.last_state_change;
        self.history.clear();
        for call in snapshot.history {
            self.push(call);
        }
        self.half_open_in_flight = 0;
    }
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

struct Rejection {
    failure_count: usize,
    retry_in: Duration,
}

/// Admission ticket for one call. Releases its half-open slot on drop, even
/// if the wrapped future panics.
struct Permit<'a> {
    core: &'a Mutex<Core>,
    half_open: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.half_open {
            let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
            if core.state == CircuitState::HalfOpen {
                core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

struct BreakerInner {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<Core>,
    clock: Arc<dyn Clock>,
    listeners: RwLock<Vec<Arc<dyn BreakerListener>>>,
    snapshots: Option<LayeredCache>,
    pruner: Mutex<Option<PeriodicTask>>,
}

impl fmt::Debug for BreakerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("core", &self.core)
            .field("persistent", &self.snapshots.is_some())
            .finish()
    }
}

/// Circuit breaker guarding calls to one named dependency.
///
/// Clones share the same underlying state via `Arc`, so all handles observe
/// and affect the same circuit lifecycle.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

/// Builder for [`CircuitBreaker`].
#[derive(Debug)]
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    snapshots: Option<LayeredCache>,
    listeners: Vec<Arc<dyn BreakerListener>>,
}

impl CircuitBreakerBuilder {
    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Persist snapshots through `cache` and allow [`CircuitBreaker::restore`].
    pub fn snapshot_cache(mut self, cache: LayeredCache) -> Self {
        self.snapshots = Some(cache);
        self
    }

    /// Register an observer at construction time.
    pub fn listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Finish the breaker; it starts CLOSED.
    pub fn build(self) -> CircuitBreaker {
        let now = self.clock.now_millis();
        CircuitBreaker {
            inner: Arc::new(BreakerInner {
                name: self.name,
                config: self.config,
                core: Mutex::new(Core::new(now)),
                clock: self.clock,
                listeners: RwLock::new(self.listeners),
                snapshots: self.snapshots,
                pruner: Mutex::new(None),
            }),
        }
    }
}

impl CircuitBreaker {
    /// Breaker on the system clock, without persistence.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::builder(name, config).build()
    }

    /// Builder for a breaker with a custom clock, snapshot cache or listeners.
    pub fn builder(name: impl Into<String>, config: CircuitBreakerConfig) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            name: name.into(),
            config,
            clock: Arc::new(SystemClock),
            snapshots: None,
            listeners: Vec::new(),
        }
    }

    /// Name of the guarded dependency.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Current state. An elapsed recovery timeout is only noticed on the next call.
    pub fn state(&self) -> CircuitState {
        self.core().state
    }

    /// Failures recorded since the breaker last closed.
    pub fn failure_count(&self) -> usize {
        self.core().failure_count
    }

    /// Whether both handles point at the same breaker.
    pub fn same_instance(&self, other: &CircuitBreaker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register an observer for state changes and openings.
    pub fn add_listener(&self, listener: Arc<dyn BreakerListener>) {
        self.inner.listeners.write().unwrap_or_else(PoisonError::into_inner).push(listener);
    }

    /// Cache key of the persisted snapshot.
    pub fn snapshot_key(&self) -> String {
        format!("circuit-breaker:{}", self.inner.name)
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    fn window_ms(&self) -> u64 {
        millis(self.inner.config.monitoring_period())
    }

    fn notify(&self, events: &[BreakerEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn BreakerListener>> =
            self.inner.listeners.read().unwrap_or_else(PoisonError::into_inner).clone();
        for event in events {
            for listener in &listeners {
                listener.on_event(event);
            }
        }
    }

    fn log_transition(&self, from: CircuitState, to: CircuitState, failures: usize) {
        tracing::debug!(
            target: "relaykit::circuit_breaker",
            breaker = %self.inner.name,
            %from,
            %to,
            failures,
            threshold = self.inner.config.failure_threshold(),
            "circuit breaker state changed"
        );
    }

    fn acquire(&self) -> Result<Permit<'_>, Rejection> {
        let now = self.now();
        let mut events = Vec::new();
        let outcome = {
            let mut core = self.core();
            let current = core.state;
            match current {
                CircuitState::Closed => Ok(Permit { core: &self.inner.core, half_open: false }),
                CircuitState::Open => {
                    let elapsed = now.saturating_sub(core.last_state_change);
                    let recovery = millis(self.inner.config.recovery_timeout());
                    if elapsed >= recovery {
                        if let Some((from, to)) = core.transition(CircuitState::HalfOpen, now) {
                            events.push(BreakerEvent::StateChanged {
                                name: self.inner.name.clone(),
                                from,
                                to,
                            });
                        }
                        core.half_open_in_flight = 1;
                        Ok(Permit { core: &self.inner.core, half_open: true })
                    } else {
                        Err(Rejection {
                            failure_count: core.failure_count,
                            retry_in: Duration::from_millis(recovery - elapsed),
                        })
                    }
                }
                CircuitState::HalfOpen => {
                    if core.half_open_in_flight >= self.inner.config.half_open_max_calls() {
                        Err(Rejection { failure_count: core.failure_count, retry_in: Duration::ZERO })
                    } else {
                        core.half_open_in_flight += 1;
                        tracing::debug!(
                            target: "relaykit::circuit_breaker",
                            breaker = %self.inner.name,
                            in_flight = core.half_open_in_flight,
                            max = self.inner.config.half_open_max_calls(),
                            "half-open probe admitted"
                        );
                        Ok(Permit { core: &self.inner.core, half_open: true })
                    }
                }
            }
        };
        if !events.is_empty() {
            self.log_transition(CircuitState::Open, CircuitState::HalfOpen, 0);
            self.notify(&events);
        }
        outcome
    }

    fn should_trip(&self, core: &Core) -> bool {
        let cfg = &self.inner.config;
        if core.history.len() < cfg.volume_threshold() {
            return false;
        }
        core.failure_count >= cfg.failure_threshold()
            || core.failure_rate() >= 0.5
            || core.slow_call_rate(millis(cfg.slow_call_duration_threshold()))
                >= cfg.slow_call_rate_threshold()
    }

    fn record(&self, success: bool, duration_ms: u64, error: Option<String>) {
        let now = self.now();
        let slow_ms = millis(self.inner.config.slow_call_duration_threshold());
        let mut events = Vec::new();
        let mut edge = None;
        let failures;
        {
            let mut core = self.core();
            core.total_calls += 1;
            core.push(CallRecord { success, duration_ms, timestamp: now });
            core.prune(now, self.window_ms());

            let current = core.state;
            if success {
                core.success_count += 1;
                edge = match current {
                    CircuitState::HalfOpen => core.transition(CircuitState::Closed, now),
                    CircuitState::Closed if duration_ms > slow_ms && self.should_trip(&core) => {
                        core.transition(CircuitState::Open, now)
                    }
                    _ => None,
                };
            } else {
                core.failure_count += 1;
                core.last_failure_time = Some(now);
                let trip = match current {
                    CircuitState::HalfOpen => true,
                    CircuitState::Closed => self.should_trip(&core),
                    CircuitState::Open => false,
                };
                if trip {
                    edge = core.transition(CircuitState::Open, now);
                }
            }
            failures = core.failure_count;
        }

        if let Some((from, to)) = edge {
            self.log_transition(from, to, failures);
            events.push(BreakerEvent::StateChanged { name: self.inner.name.clone(), from, to });
            if to == CircuitState::Open {
                events.push(BreakerEvent::Opened {
                    name: self.inner.name.clone(),
                    failure_count: failures,
                    error,
                });
            }
            self.notify(&events);
        }
    }

    /// Execute `operation` under circuit breaker protection.
    ///
    /// # Errors
    /// - [`BreakerError::Open`] if the breaker is open (or half-open at its
    ///   probe limit); `operation` is not invoked.
    /// - [`BreakerError::Inner`] with the operation's own error, unchanged.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, BreakerError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                tracing::debug!(
                    target: "relaykit::circuit_breaker",
                    breaker = %self.inner.name,
                    retry_in = ?rejection.retry_in,
                    "call rejected by open circuit"
                );
                return Err(BreakerError::Open {
                    name: self.inner.name.clone(),
                    failure_count: rejection.failure_count,
                    retry_in: rejection.retry_in,
                });
            }
        };

        let started = self.now();
        let result = operation().await;
        let duration_ms = self.now().saturating_sub(started);

        match &result {
            Ok(_) => self.record(true, duration_ms, None),
            Err(err) if self.inner.config.is_expected(err) => {
                tracing::debug!(
                    target: "relaykit::circuit_breaker",
                    breaker = %self.inner.name,
                    error = %err,
                    "expected error recorded as success"
                );
                self.record(true, duration_ms, None)
            }
            Err(err) => self.record(false, duration_ms, Some(err.to_string())),
        }
        drop(permit);

        self.persist().await;
        result.map_err(BreakerError::Inner)
    }

    /// Like [`execute`](Self::execute), but an open-circuit rejection runs
    /// `fallback` instead. The primary's own errors are returned unchanged.
    pub async fn execute_with_fallback<T, E, Fut, Op, FbFut, Fb>(
        &self,
        primary: Op,
        fallback: Fb,
    ) -> Result<T, E>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
        FbFut: Future<Output = Result<T, E>> + Send,
        Fb: FnOnce() -> FbFut + Send,
    {
        match self.execute(primary).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Inner(err)) => Err(err),
            Err(BreakerError::Open { .. }) => {
                tracing::debug!(
                    target: "relaykit::circuit_breaker",
                    breaker = %self.inner.name,
                    "circuit open; using fallback"
                );
                fallback().await
            }
        }
    }

    /// Recompute rates over the current window.
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = self.now();
        let slow_ms = millis(self.inner.config.slow_call_duration_threshold());
        let mut core = self.core();
        core.prune(now, self.window_ms());
        CircuitBreakerStats {
            name: self.inner.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            total_calls: core.total_calls,
            last_failure_time: core.last_failure_time,
            last_state_change: core.last_state_change,
            window_calls: core.history.len(),
            failure_rate: core.failure_rate(),
            average_response_time_ms: core.average_response_time(),
            slow_call_rate: core.slow_call_rate(slow_ms),
        }
    }

    /// Drop history older than the monitoring window. Returns how many records went.
    pub fn prune_history(&self) -> usize {
        let now = self.now();
        let window = self.window_ms();
        self.core().prune(now, window)
    }

    /// Force CLOSED, zero all counters and clear history.
    pub fn reset(&self) {
        let now = self.now();
        let edge = {
            let mut core = self.core();
            let edge = core.transition(CircuitState::Closed, now);
            core.failure_count = 0;
            core.success_count = 0;
            core.total_calls = 0;
            core.last_failure_time = None;
            core.last_state_change = now;
            core.history.clear();
            edge
        };
        tracing::info!(target: "relaykit::circuit_breaker", breaker = %self.inner.name, "circuit breaker reset");
        if let Some((from, to)) = edge {
            self.notify(&[BreakerEvent::StateChanged { name: self.inner.name.clone(), from, to }]);
        }
        self.persist_in_background();
    }

    /// Force OPEN regardless of stats. Emits a state change but no `Opened` event.
    pub fn force_open(&self) {
        let now = self.now();
        let edge = {
            let mut core = self.core();
            let edge = core.transition(CircuitState::Open, now);
            core.last_state_change = now;
            edge
        };
        tracing::warn!(target: "relaykit::circuit_breaker", breaker = %self.inner.name, "circuit breaker forced open");
        if let Some((from, to)) = edge {
            self.notify(&[BreakerEvent::StateChanged { name: self.inner.name.clone(), from, to }]);
        }
        self.persist_in_background();
    }

    fn persist_in_background(&self) {
        if self.inner.snapshots.is_none() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let this = self.clone();
            handle.spawn(async move { this.persist().await });
        }
    }

    /// Write the current snapshot to the snapshot cache, if one is attached.
    pub async fn persist(&self) {
        let Some(cache) = &self.inner.snapshots else {
            return;
        };
        let snapshot = self.core().snapshot();
        if let Err(err) = cache.set(&self.snapshot_key(), &snapshot, Some(SNAPSHOT_TTL)).await {
            tracing::warn!(
                target: "relaykit::circuit_breaker",
                breaker = %self.inner.name,
                error = %err,
                "failed to persist circuit breaker snapshot"
            );
        }
    }

    /// Load the persisted snapshot. Returns `false` (leaving the breaker
    /// untouched) when there is no cache, no snapshot, or an unreadable one.
    pub async fn restore(&self) -> bool {
        let Some(cache) = &self.inner.snapshots else {
            return false;
        };
        let Some(snapshot) = cache.get::<BreakerSnapshot>(&self.snapshot_key()).await else {
            return false;
        };
        let now = self.now();
        let window = self.window_ms();
        let state = {
            let mut core = self.core();
            core.restore(snapshot);
            core.prune(now, window);
            core.state
        };
        tracing::info!(
            target: "relaykit::circuit_breaker",
            breaker = %self.inner.name,
            %state,
            "circuit breaker restored from snapshot"
        );
        true
    }

    /// Prune history on a fixed period until the breaker is dropped.
    pub fn start_pruning(&self, period: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let task = PeriodicTask::spawn("breaker-prune", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    CircuitBreaker { inner }.prune_history();
                }
            }
        });
        *self.inner.pruner.lock().unwrap_or_else(PoisonError::into_inner) = task;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::clock::ManualClock;
    use crate::telemetry::MemoryListener;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn config(threshold: usize, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .volume_threshold(threshold)
            .recovery_timeout(Duration::from_millis(recovery_ms))
            .build()
            .unwrap()
    }

    fn breaker(threshold: usize, recovery_ms: u64, clock: &ManualClock) -> CircuitBreaker {
        CircuitBreaker::builder("test", config(threshold, recovery_ms)).clock(clock.clone()).build()
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        b.execute(|| async { Err::<(), _>(TestError("fail".into())) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<TestError>> {
        b.execute(|| async { Ok::<_, TestError>(42) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects_without_calling() {
        let clock = ManualClock::new();
        let b = breaker(3, 10_000, &clock);
        for _ in 0..3 {
            assert!(fail(&b).await.unwrap_err().is_inner());
        }
        assert_eq!(b.state(), CircuitState::Open);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let res = b
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await;
        let err = res.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(err.retry_in(), Some(Duration::from_millis(10_000)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.stats().total_calls, 3, "rejections are not recorded");
    }

    #[tokio::test]
    async fn volume_threshold_gates_tripping() {
        let clock = ManualClock::new();
        let cfg = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .volume_threshold(3)
            .build()
            .unwrap();
        let b = CircuitBreaker::builder("gate", cfg).clock(clock.clone()).build();
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn failure_rate_trips_before_count() {
        let clock = ManualClock::new();
        let cfg = CircuitBreakerConfig::builder()
            .failure_threshold(10)
            .volume_threshold(4)
            .build()
            .unwrap();
        let b = CircuitBreaker::builder("rate", cfg).clock(clock.clone()).build();
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open, "2 of 4 calls failed");
    }

    #[tokio::test]
    async fn slow_calls_trip_the_breaker() {
        let clock = ManualClock::new();
        let cfg = CircuitBreakerConfig::builder()
            .volume_threshold(2)
            .slow_call_duration_threshold(Duration::from_millis(100))
            .slow_call_rate_threshold(1.0)
            .build()
            .unwrap();
        let b = CircuitBreaker::builder("slow", cfg).clock(clock.clone()).build();
        for _ in 0..2 {
            let c = clock.clone();
            b.execute(|| async move {
                c.advance(250);
                Ok::<_, TestError>(())
            })
            .await
            .unwrap();
        }
        assert_eq!(b.state(), CircuitState::Open);
        let stats = b.stats();
        assert_eq!(stats.slow_call_rate, 1.0);
        assert_eq!(stats.average_response_time_ms, 250.0);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let clock = ManualClock::new();
        let listener = MemoryListener::new();
        let b = breaker(3, 100, &clock);
        b.add_listener(Arc::new(listener.clone()));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }

        clock.advance(101);
        assert_eq!(succeed(&b).await.unwrap(), 42);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);

        let edges: Vec<(CircuitState, CircuitState)> = listener
            .events()
            .into_iter()
            .filter_map(|e| match e {
                BreakerEvent::StateChanged { from, to, .. } => Some((from, to)),
                BreakerEvent::Opened { .. } => None,
            })
            .collect();
        assert_eq!(
            edges,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn opened_event_carries_failure_details() {
        let clock = ManualClock::new();
        let listener = MemoryListener::new();
        let b = breaker(2, 100, &clock);
        b.add_listener(Arc::new(listener.clone()));
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();

        let opened = listener
            .events()
            .into_iter()
            .find(|e| matches!(e, BreakerEvent::Opened { .. }))
            .expect("opened event");
        assert_eq!(
            opened,
            BreakerEvent::Opened {
                name: "test".into(),
                failure_count: 2,
                error: Some("TestError: fail".into()),
            }
        );
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let clock = ManualClock::new();
        let b = breaker(2, 100, &clock);
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();

        clock.advance(150);
        assert!(fail(&b).await.unwrap_err().is_inner());
        assert_eq!(b.state(), CircuitState::Open);
        assert!(succeed(&b).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn half_open_limits_concurrent_probes() {
        let clock = ManualClock::new();
        let b = breaker(1, 100, &clock);
        fail(&b).await.unwrap_err();
        clock.advance(150);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.execute(|| async move {
                    let _ = rx.await;
                    Ok::<_, TestError>(1)
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        while b.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }

        assert!(succeed(&b).await.unwrap_err().is_circuit_open());
        tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_slot_released_on_panic() {
        let clock = ManualClock::new();
        let b = breaker(1, 10, &clock);
        fail(&b).await.unwrap_err();
        clock.advance(20);

        let result: Result<Result<(), BreakerError<TestError>>, _> =
            std::panic::AssertUnwindSafe(async { b.execute(|| async { panic!("boom") }).await })
                .catch_unwind()
                .await;
        assert!(result.is_err());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.core().half_open_in_flight, 0);
        assert_eq!(succeed(&b).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn expected_errors_never_trip() {
        #[derive(Debug)]
        struct RateLimitError;
        impl fmt::Display for RateLimitError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "429 slow down")
            }
        }
        impl std::error::Error for RateLimitError {}

        let cfg = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .volume_threshold(1)
            .expected_error("RateLimitError")
            .build()
            .unwrap();
        let b = CircuitBreaker::builder("resend", cfg).clock(ManualClock::new()).build();
        for _ in 0..20 {
            let err = b.execute(|| async { Err::<(), _>(RateLimitError) }).await.unwrap_err();
            assert!(err.is_inner(), "the caller still sees the error");
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().success_count, 20);
    }

    #[tokio::test]
    async fn fallback_runs_only_when_open() {
        let clock = ManualClock::new();
        let b = breaker(1, 1_000, &clock);

        let primary_err = b
            .execute_with_fallback(
                || async { Err::<u32, _>(TestError("down".into())) },
                || async { Ok(7) },
            )
            .await;
        assert_eq!(primary_err, Err(TestError("down".into())));

        let fallback = b
            .execute_with_fallback(|| async { Ok::<u32, TestError>(1) }, || async { Ok(7) })
            .await;
        assert_eq!(fallback, Ok(7));
    }

    #[tokio::test]
    async fn history_is_pruned_to_the_window() {
        let clock = ManualClock::new();
        let cfg = CircuitBreakerConfig::builder()
            .monitoring_period(Duration::from_secs(10))
            .build()
            .unwrap();
        let b = CircuitBreaker::builder("window", cfg).clock(clock.clone()).build();
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        clock.advance(10_001);
        assert_eq!(b.stats().window_calls, 0);
        assert_eq!(b.stats().total_calls, 2);

        succeed(&b).await.unwrap();
        clock.advance(5_000);
        assert_eq!(b.prune_history(), 0);
        assert_eq!(b.stats().window_calls, 1);
    }

    #[tokio::test]
    async fn reset_and_force_open() {
        let clock = ManualClock::new();
        let b = breaker(1, 60_000, &clock);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        b.reset();
        let stats = b.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.window_calls, 0);
        assert_eq!(stats.last_failure_time, None);

        b.force_open();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(succeed(&b).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn snapshot_survives_a_new_instance() {
        let clock = ManualClock::starting_at(1_000);
        let cache = LayeredCache::builder(CacheConfig::default()).clock(clock.clone()).build();
        let first = CircuitBreaker::builder("sendgrid", config(2, 60_000))
            .clock(clock.clone())
            .snapshot_cache(cache.clone())
            .build();
        fail(&first).await.unwrap_err();
        fail(&first).await.unwrap_err();
        assert_eq!(first.state(), CircuitState::Open);

        let second = CircuitBreaker::builder("sendgrid", config(2, 60_000))
            .clock(clock.clone())
            .snapshot_cache(cache.clone())
            .build();
        assert!(second.restore().await);
        assert_eq!(second.state(), CircuitState::Open);
        assert_eq!(second.failure_count(), 2);
        assert!(succeed(&second).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn history_and_snapshot_keep_only_recent_calls() {
        let clock = ManualClock::starting_at(1_000);
        let cache = LayeredCache::builder(CacheConfig::default()).clock(clock.clone()).build();
        let b = CircuitBreaker::builder("busy", CircuitBreakerConfig::default())
            .clock(clock.clone())
            .snapshot_cache(cache.clone())
            .build();
        for _ in 0..2_000 {
            clock.advance(1);
            succeed(&b).await.unwrap();
        }

        let stats = b.stats();
        assert_eq!(stats.total_calls, 2_000);
        assert_eq!(stats.window_calls, MAX_WINDOW_CALLS);

        let persisted: serde_json::Value = cache.get(&b.snapshot_key()).await.unwrap();
        let history = persisted["history"].as_array().unwrap();
        assert_eq!(history.len(), MAX_WINDOW_CALLS);
        assert_eq!(history.last().unwrap()["timestamp"], 3_000);
        assert_eq!(history[0]["timestamp"], 3_000 - MAX_WINDOW_CALLS as u64 + 1);
        assert!(serde_json::to_string(&persisted).unwrap().len() < 10_000);
    }

    #[tokio::test]
    async fn oversized_snapshot_is_truncated_on_restore() {
        let clock = ManualClock::starting_at(10_000);
        let cache = LayeredCache::builder(CacheConfig::default()).clock(clock.clone()).build();
        let history: Vec<CallRecord> = (0..500)
            .map(|i| CallRecord { success: i % 2 == 0, duration_ms: 3, timestamp: 9_000 + i })
            .collect();
        let snapshot = BreakerSnapshot {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 250,
            total_calls: 500,
            last_failure_time: None,
            last_state_change: 1_000,
            history,
        };
        cache.set("circuit-breaker:legacy", &snapshot, None).await.unwrap();

        let b = CircuitBreaker::builder("legacy", CircuitBreakerConfig::default())
            .clock(clock.clone())
            .snapshot_cache(cache)
            .build();
        assert!(b.restore().await);
        let stats = b.stats();
        assert_eq!(stats.window_calls, MAX_WINDOW_CALLS);
        assert_eq!(stats.total_calls, 500);
        assert_eq!(b.core().history.front().map(|c| c.timestamp), Some(9_400));
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_closed() {
        let cache = LayeredCache::new(CacheConfig::default());
        cache.set("circuit-breaker:smtp", &"not a snapshot", None).await.unwrap();
        let b = CircuitBreaker::builder("smtp", CircuitBreakerConfig::default())
            .snapshot_cache(cache)
            .build();
        assert!(!b.restore().await);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[test]
    fn state_names() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&CircuitState::Open).unwrap(), "\"OPEN\"");
    }
}
