//! Convenient re-exports for common relaykit types.
pub use crate::{
    cache::{CacheConfig, CacheError, CacheResult, LayeredCache, SharedStore},
    circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitBreakerStats,
        CircuitState,
    },
    circuit_breaker_registry::CircuitBreakerRegistry,
    classify::{ErrorContext, ErrorKind, ErrorResponder, ErrorResponse, ErrorSignal, ToSignal},
    presets, BreakerError, ConfigError,
};
