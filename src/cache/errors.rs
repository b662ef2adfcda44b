//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
///
/// Shared-store implementations return these; [`LayeredCache`](crate::cache::LayeredCache)
/// absorbs them (logging a warning) so that only value serialization failures
/// ever reach its callers.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Failed to connect to the shared store
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize a cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Shared-store operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),
}

impl CacheError {
    /// Whether the error means the shared store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
