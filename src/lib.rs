#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # relaykit
//!
//! Resilience layer for outbound provider traffic: a two-tier cache, circuit
//! breakers with a process-wide registry, and a classifier that turns any
//! failure into a client-safe error response.
//!
//! ## Features
//!
//! - **Layered cache** with an in-process LRU/TTL tier and an optional shared
//!   store that degrades to a no-op when unreachable
//! - **Circuit breakers** with sliding-window failure and slow-call rates,
//!   half-open probing, and snapshots that survive restarts
//! - **Registry** of named breakers with email-provider presets and health
//!   reporting
//! - **Error classification** into a closed set of kinds with HTTP status,
//!   retry guidance and user-safe messages
//!
//! ## Quick Start
//!
//! ```rust
//! use relaykit::{CircuitBreakerRegistry, CircuitState};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let registry = CircuitBreakerRegistry::new();
//!     let breaker = registry.get_circuit_breaker("billing-api", None).await;
//!
//!     let result = breaker
//!         .execute(|| async { Ok::<_, std::io::Error>("charged") })
//!         .await;
//!
//!     assert_eq!(result.unwrap(), "charged");
//!     assert_eq!(breaker.state(), CircuitState::Closed);
//! }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod classify;
pub mod clock;
pub mod error;
pub mod prelude;
pub mod presets;
pub mod task;
pub mod telemetry;
#[cfg(test)]
mod test_log;

// Re-exports
pub use cache::{CacheConfig, CacheError, InMemorySharedStore, LayeredCache, SharedStore};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitBreakerStats, CircuitState,
};
pub use circuit_breaker_registry::{CircuitBreakerRegistry, RegistryError, RegistryHealth};
pub use classify::{ErrorContext, ErrorKind, ErrorResponder, ErrorResponse, ErrorSignal, ToSignal};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use error::{BreakerError, ConfigError};
pub use task::PeriodicTask;
