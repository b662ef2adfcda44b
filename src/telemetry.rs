//! Breaker notifications.
//!
//! Circuit breakers publish [`BreakerEvent`]s to every registered
//! [`BreakerListener`]. Listeners are invoked synchronously on the calling task
//! after the state change is committed, so they must be cheap and must not
//! call back into the breaker that notified them.
//!
//! ```rust
//! use relaykit::telemetry::{BreakerEvent, MemoryListener};
//! use relaykit::{CircuitBreaker, CircuitBreakerConfig};
//! use std::sync::Arc;
//!
//! let listener = MemoryListener::with_capacity(16);
//! let breaker = CircuitBreaker::new("smtp", CircuitBreakerConfig::default());
//! breaker.add_listener(Arc::new(listener.clone()));
//! breaker.force_open();
//! assert!(matches!(listener.events()[0], BreakerEvent::StateChanged { .. }));
//! ```

use crate::circuit_breaker::CircuitState;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Events emitted by circuit breakers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    /// The breaker moved between states.
    StateChanged {
        /// Breaker name.
        name: String,
        /// Previous state.
        from: CircuitState,
        /// New state.
        to: CircuitState,
    },
    /// The breaker tripped open because of recorded failures.
    ///
    /// Emitted after the matching `StateChanged`. Not emitted for
    /// `force_open`.
    Opened {
        /// Breaker name.
        name: String,
        /// Failures recorded since the breaker last closed.
        failure_count: usize,
        /// Display text of the failure that tripped the breaker, if any.
        error: Option<String>,
    },
}

impl BreakerEvent {
    /// Name of the breaker that produced the event.
    pub fn breaker(&self) -> &str {
        match self {
            Self::StateChanged { name, .. } | Self::Opened { name, .. } => name,
        }
    }
}

impl fmt::Display for BreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChanged { name, from, to } => {
                write!(f, "circuit breaker '{}' {} -> {}", name, from, to)
            }
            Self::Opened { name, failure_count, error } => match error {
                Some(err) => write!(
                    f,
                    "circuit breaker '{}' opened after {} failures: {}",
                    name, failure_count, err
                ),
                None => {
                    write!(f, "circuit breaker '{}' opened after {} failures", name, failure_count)
                }
            },
        }
    }
}

/// Observer of breaker events.
pub trait BreakerListener: Send + Sync + fmt::Debug {
    /// Called once per event, after the state change is committed.
    fn on_event(&self, event: &BreakerEvent);
}

/// Listener that logs events through `tracing`.
///
/// Openings are logged at `error`, other transitions at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl BreakerListener for LogListener {
    fn on_event(&self, event: &BreakerEvent) {
        match event {
            BreakerEvent::StateChanged { name, from, to } => tracing::info!(
                target: "relaykit::circuit_breaker_registry",
                breaker = %name,
                from = %from,
                to = %to,
                "circuit breaker state changed"
            ),
            BreakerEvent::Opened { name, failure_count, error } => tracing::error!(
                target: "relaykit::circuit_breaker_registry",
                breaker = %name,
                failure_count,
                error = error.as_deref().unwrap_or("none"),
                "circuit breaker opened"
            ),
        }
    }
}

/// Listener that keeps the most recent events in memory.
#[derive(Debug, Clone)]
pub struct MemoryListener {
    events: Arc<Mutex<VecDeque<BreakerEvent>>>,
    capacity: usize,
}

impl MemoryListener {
    /// Listener keeping the last 1000 events.
    pub fn new() -> Self {
        Self::with_capacity(1_000)
    }

    /// Listener keeping the last `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::new(Mutex::new(VecDeque::new())), capacity: capacity.max(1) }
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<BreakerEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no events are recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for MemoryListener {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerListener for MemoryListener {
    fn on_event(&self, event: &BreakerEvent) {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(event.clone());
    }
}
