//! Breaker presets for outbound email providers.
//!
//! Each provider gets its own registry name and thresholds:
//!
//! - [`RESEND`]: HTTP API that fails hard when down. Tight threshold, short recovery.
//! - [`SENDGRID`]: HTTP API with aggressive rate limiting. Rate-limit and quota
//!   responses are expected and never trip the breaker.
//! - [`SMTP`]: relay with slow handshakes. Longer slow-call threshold and
//!   recovery period.
//!
//! ```rust
//! use relaykit::{presets, CircuitBreakerRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = CircuitBreakerRegistry::with_email_providers().await;
//! assert!(registry.get(presets::SENDGRID).is_some());
//! # }
//! ```

use crate::circuit_breaker::CircuitBreakerConfig;
use std::time::Duration;

/// Registry name of the Resend API breaker.
pub const RESEND: &str = "resend";
/// Registry name of the SendGrid API breaker.
pub const SENDGRID: &str = "sendgrid";
/// Registry name of the SMTP relay breaker.
pub const SMTP: &str = "smtp";

const RESEND_FAILURE_THRESHOLD: usize = 3;
const RESEND_RECOVERY_SECS: u64 = 30;
const RESEND_SLOW_CALL_SECS: u64 = 10;

const SENDGRID_FAILURE_THRESHOLD: usize = 5;
const SENDGRID_RECOVERY_SECS: u64 = 60;
const SENDGRID_SLOW_CALL_SECS: u64 = 10;

const SMTP_FAILURE_THRESHOLD: usize = 5;
const SMTP_RECOVERY_SECS: u64 = 120;
const SMTP_SLOW_CALL_SECS: u64 = 30;

/// Messages and error type names providers use for throttling.
const THROTTLE_PATTERNS: [&str; 4] = ["rate limit", "RateLimit", "quota", "Quota"];

fn build(
    failure_threshold: usize,
    recovery_secs: u64,
    slow_call_secs: u64,
    expected: &[&str],
) -> CircuitBreakerConfig {
    let builder = CircuitBreakerConfig::builder()
        .failure_threshold(failure_threshold)
        .volume_threshold(failure_threshold)
        .recovery_timeout(Duration::from_secs(recovery_secs))
        .slow_call_duration_threshold(Duration::from_secs(slow_call_secs))
        .expected_errors(expected.iter().copied());
    // All constants are non-zero.
    builder.build().unwrap_or_default()
}

/// Resend: fails hard, so trip early and probe again soon.
pub fn resend() -> CircuitBreakerConfig {
    build(RESEND_FAILURE_THRESHOLD, RESEND_RECOVERY_SECS, RESEND_SLOW_CALL_SECS, &THROTTLE_PATTERNS)
}

/// SendGrid: throttling responses are expected.
pub fn sendgrid() -> CircuitBreakerConfig {
    build(
        SENDGRID_FAILURE_THRESHOLD,
        SENDGRID_RECOVERY_SECS,
        SENDGRID_SLOW_CALL_SECS,
        &THROTTLE_PATTERNS,
    )
}

/// SMTP relay: tolerate slow handshakes, recover slowly.
pub fn smtp() -> CircuitBreakerConfig {
    build(SMTP_FAILURE_THRESHOLD, SMTP_RECOVERY_SECS, SMTP_SLOW_CALL_SECS, &["450", "452"])
}

/// All email provider presets as `(name, config)` pairs.
pub fn email_providers() -> Vec<(&'static str, CircuitBreakerConfig)> {
    vec![(RESEND, resend()), (SENDGRID, sendgrid()), (SMTP, smtp())]
}
