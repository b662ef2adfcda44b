//! Error types shared across the crate.
use std::fmt;
use std::time::Duration;

/// Outcome of a call protected by a circuit breaker.
///
/// `Inner` carries the wrapped operation's own error untouched. `Open` is the
/// synthetic fast-fail rejection; callers branch on it (see
/// [`is_circuit_open`](Self::is_circuit_open)) to drive fallbacks.
#[derive(Debug, Clone)]
pub enum BreakerError<E> {
    /// The circuit breaker rejected the call without invoking the operation.
    Open {
        /// Name of the breaker that rejected the call.
        name: String,
        /// Failures recorded since the breaker last closed.
        failure_count: usize,
        /// Time remaining until a trial call is allowed.
        retry_in: Duration,
    },
    /// The underlying operation failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { name, failure_count, retry_in } => write!(
                f,
                "circuit breaker '{}' is open ({} failures, retry in {:?})",
                name, failure_count, retry_in
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

impl<E> BreakerError<E> {
    /// Check if this error is the breaker's own fast-fail rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }

    /// Time until the breaker admits a trial call, if this is a rejection.
    pub fn retry_in(&self) -> Option<Duration> {
        match self {
            Self::Open { retry_in, .. } => Some(*retry_in),
            Self::Inner(_) => None,
        }
    }

    /// Map the inner error, keeping rejections as-is.
    pub fn map_inner<F, E2>(self, f: F) -> BreakerError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Inner(e) => BreakerError::Inner(f(e)),
            Self::Open { name, failure_count, retry_in } => {
                BreakerError::Open { name, failure_count, retry_in }
            }
        }
    }
}

/// Errors produced when validating breaker or cache configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Count-style thresholds must be > 0.
    #[error("{field} must be > 0 (got {provided})")]
    ZeroThreshold {
        /// Offending field.
        field: &'static str,
        /// Value provided by caller.
        provided: usize,
    },
    /// Durations must be > 0.
    #[error("{field} must be > 0 (got {provided:?})")]
    ZeroDuration {
        /// Offending field.
        field: &'static str,
        /// Value provided by caller.
        provided: Duration,
    },
    /// Rates must lie in (0, 1].
    #[error("{field} must be within (0, 1] (got {provided})")]
    RateOutOfRange {
        /// Offending field.
        field: &'static str,
        /// Value provided by caller.
        provided: f64,
    },
}
