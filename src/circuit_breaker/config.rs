use crate::error::ConfigError;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default snapshot lifetime in the cache.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(3_600);

/// Predicate marking an error as expected (recorded as a success).
pub type ExpectedErrorPredicate = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Validated configuration for a [`CircuitBreaker`](crate::CircuitBreaker).
///
/// Build with [`CircuitBreakerConfig::builder`]; `Default` gives the
/// production defaults (threshold 5, 60 s recovery, 120 s window, volume 5,
/// 5 s slow calls at a 50% slow rate, one half-open probe).
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    recovery_timeout: Duration,
    monitoring_period: Duration,
    volume_threshold: usize,
    slow_call_duration_threshold: Duration,
    slow_call_rate_threshold: f64,
    half_open_max_calls: usize,
    expected_errors: Vec<String>,
    expected_when: Option<ExpectedErrorPredicate>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(120),
            volume_threshold: 5,
            slow_call_duration_threshold: Duration::from_secs(5),
            slow_call_rate_threshold: 0.5,
            half_open_max_calls: 1,
            expected_errors: Vec::new(),
            expected_when: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("monitoring_period", &self.monitoring_period)
            .field("volume_threshold", &self.volume_threshold)
            .field("slow_call_duration_threshold", &self.slow_call_duration_threshold)
            .field("slow_call_rate_threshold", &self.slow_call_rate_threshold)
            .field("half_open_max_calls", &self.half_open_max_calls)
            .field("expected_errors", &self.expected_errors)
            .field("expected_when", &self.expected_when.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl CircuitBreakerConfig {
    /// Builder seeded with the defaults.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Failures (since last close) needed to open from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Time to stay Open before a half-open probe is admitted.
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Width of the sliding call-history window.
    pub fn monitoring_period(&self) -> Duration {
        self.monitoring_period
    }

    /// Minimum calls in the window before the breaker may trip.
    pub fn volume_threshold(&self) -> usize {
        self.volume_threshold
    }

    /// Calls taking at least this long count as slow.
    pub fn slow_call_duration_threshold(&self) -> Duration {
        self.slow_call_duration_threshold
    }

    /// Share of slow calls in the window that trips the breaker.
    pub fn slow_call_rate_threshold(&self) -> f64 {
        self.slow_call_rate_threshold
    }

    /// Maximum concurrent trial calls while Half-Open.
    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }

    /// Patterns of errors recorded as successes.
    pub fn expected_errors(&self) -> &[String] {
        &self.expected_errors
    }

    /// Whether `err` should be recorded as a success.
    ///
    /// A pattern matches when the error message contains it, when it equals
    /// the error's short type name, or when the error's `Debug` output starts
    /// with it (enum variant names).
    pub fn is_expected<E>(&self, err: &E) -> bool
    where
        E: Error + 'static,
    {
        if let Some(pred) = &self.expected_when {
            if pred(err) {
                return true;
            }
        }
        if self.expected_errors.is_empty() {
            return false;
        }
        let message = err.to_string();
        let type_name = short_type_name(std::any::type_name::<E>());
        let debug = format!("{:?}", err);
        self.expected_errors.iter().any(|pattern| {
            message.contains(pattern.as_str())
                || type_name == pattern
                || debug.starts_with(pattern.as_str())
        })
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
    volume_set: bool,
}

impl fmt::Debug for CircuitBreakerConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CircuitBreakerConfigBuilder").field(&self.config).finish()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Failures that trip the breaker. Unless set explicitly, the volume
    /// threshold is capped at this value.
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.config.failure_threshold = n;
        self
    }

    /// How long to stay Open before admitting a half-open trial.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Width of the sliding window used for rates.
    pub fn monitoring_period(mut self, period: Duration) -> Self {
        self.config.monitoring_period = period;
        self
    }

    /// Minimum calls in the window before any trip rule applies.
    pub fn volume_threshold(mut self, n: usize) -> Self {
        self.config.volume_threshold = n;
        self.volume_set = true;
        self
    }

    /// Duration at which a call counts as slow.
    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    /// Slow-call share in `(0, 1]` that trips the breaker.
    pub fn slow_call_rate_threshold(mut self, rate: f64) -> Self {
        self.config.slow_call_rate_threshold = rate;
        self
    }

    /// Concurrent trial calls admitted while Half-Open.
    pub fn half_open_max_calls(mut self, n: usize) -> Self {
        self.config.half_open_max_calls = n;
        self
    }

    /// Add an expected-error pattern (message substring, type name or variant name).
    pub fn expected_error(mut self, pattern: impl Into<String>) -> Self {
        self.config.expected_errors.push(pattern.into());
        self
    }

    /// Add several expected-error patterns.
    pub fn expected_errors<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expected_errors.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Mark errors as expected with an arbitrary predicate.
    pub fn expected_when<F>(mut self, pred: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.config.expected_when = Some(Arc::new(pred));
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        let mut c = self.config;
        if !self.volume_set {
            c.volume_threshold = c.volume_threshold.min(c.failure_threshold);
        }
        for (field, value) in [
            ("failure_threshold", c.failure_threshold),
            ("volume_threshold", c.volume_threshold),
            ("half_open_max_calls", c.half_open_max_calls),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroThreshold { field, provided: value });
            }
        }
        for (field, value) in [
            ("recovery_timeout", c.recovery_timeout),
            ("monitoring_period", c.monitoring_period),
            ("slow_call_duration_threshold", c.slow_call_duration_threshold),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field, provided: value });
            }
        }
        let rate = c.slow_call_rate_threshold;
        if rate.is_nan() || rate <= 0.0 || rate > 1.0 {
            return Err(ConfigError::RateOutOfRange {
                field: "slow_call_rate_threshold",
                provided: rate,
            });
        }
        Ok(c)
    }
}
