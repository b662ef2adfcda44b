//! Error classification and client-safe responses.
//!
//! [`ErrorResponder::handle`] turns any [`ErrorSignal`] into an
//! [`ErrorResponse`] carrying a closed [`ErrorKind`], a user-safe message,
//! a recovery hint and retry guidance. It never fails: anything it cannot
//! place is `UNKNOWN`.
//!
//! Classification order (first match wins):
//!
//! 1. kind preset on the signal
//! 2. socket codes (`ECONNREFUSED`, `ETIMEDOUT`, ...)
//! 3. HTTP status (401, 403, 422, 429, 502-504)
//! 4. provider-tagged errors, refined by message
//! 5. database codes
//! 6. schema-validation issues
//! 7. message markers: feature disabled, decrypt/encrypt, cache
//!
//! ```rust
//! use relaykit::classify::{ErrorContext, ErrorKind, ErrorResponder, ErrorSignal};
//!
//! let responder = ErrorResponder::new();
//! let http = responder.create_response(
//!     &ErrorSignal::new("Too Many Requests").http_status(429),
//!     &ErrorContext::new().operation("send_email"),
//! );
//! assert_eq!(http.status, 429);
//! assert_eq!(http.retry_after, Some(60));
//! assert_eq!(http.body.error.kind, ErrorKind::RateLimit);
//! assert!(http.body.error.code.starts_with("SEND_EMAIL_RATE_LIMIT_"));
//! ```

mod kind;
mod response;
mod signal;

pub use kind::{ErrorKind, Severity};
pub use response::{ErrorDetail, ErrorResponse, HttpErrorResponse};
pub use signal::{ErrorSignal, SchemaIssue, ToSignal};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default prefix for documentation links.
pub const DEFAULT_DOCS_BASE: &str = "/docs/errors";

/// Caller metadata used to enrich one response and log line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub operation: Option<String>,
    pub resource: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ErrorContext {
    /// Empty context; missing fields fall back to generated values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlation id echoed in the response. Generated when absent.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Acting user, logged for warning and critical errors.
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Operation name; prefixes the error code.
    pub fn operation(mut self, op: impl Into<String>) -> Self {
        self.operation = Some(op.into());
        self
    }

    /// Resource the operation touched.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach one metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Pin the response timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Builds [`ErrorResponse`]s and logs each classified error by severity.
#[derive(Debug, Clone)]
pub struct ErrorResponder {
    docs_base: String,
}

impl Default for ErrorResponder {
    fn default() -> Self {
        Self { docs_base: DEFAULT_DOCS_BASE.to_string() }
    }
}

impl ErrorResponder {
    /// Responder linking documentation under [`DEFAULT_DOCS_BASE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix documentation links with `base` (e.g. a public help-center URL).
    pub fn with_docs_base(base: impl Into<String>) -> Self {
        Self { docs_base: base.into().trim_end_matches('/').to_string() }
    }

    /// Classify `signal` and build the response.
    pub fn handle(&self, signal: &ErrorSignal, ctx: &ErrorContext) -> ErrorResponse {
        let kind = signal.classify();
        let now = ctx.timestamp.unwrap_or_else(Utc::now);
        let request_id =
            ctx.request_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let operation = ctx.operation.as_deref().unwrap_or("unknown");
        let code = error_code(operation, kind, now.timestamp_millis());

        log_classified(kind, signal, ctx, &request_id, &code);

        ErrorResponse {
            success: false,
            error: ErrorDetail {
                kind,
                code,
                message: kind.message().to_string(),
                user_message: signal
                    .user_message
                    .clone()
                    .unwrap_or_else(|| kind.user_message().to_string()),
                details: signal.details.clone(),
                recovery: Some(kind.recovery().to_string()),
                documentation: kind
                    .documentation_slug()
                    .map(|slug| format!("{}/{}", self.docs_base, slug)),
                request_id,
                timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                retryable: kind.is_retryable() || kind.retry_after_secs().is_some(),
                retry_after: kind.retry_after_secs(),
            },
        }
    }

    /// [`handle`](Self::handle) plus the HTTP status and `Retry-After` value.
    pub fn create_response(&self, signal: &ErrorSignal, ctx: &ErrorContext) -> HttpErrorResponse {
        let body = self.handle(signal, ctx);
        HttpErrorResponse {
            status: body.error.kind.http_status(),
            retry_after: body.error.retry_after,
            body,
        }
    }
}

fn error_code(operation: &str, kind: ErrorKind, millis: i64) -> String {
    let op: String = operation
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}_{}_{}", op, kind.as_str(), base36_tail(millis.unsigned_abs()))
}

/// Last six base-36 digits of `n`, uppercase.
fn base36_tail(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut out = Vec::with_capacity(6);
    for _ in 0..6 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn log_classified(kind: ErrorKind, signal: &ErrorSignal, ctx: &ErrorContext, request_id: &str, code: &str) {
    let operation = ctx.operation.as_deref().unwrap_or("-");
    let user = ctx.user_id.as_deref().unwrap_or("-");
    let resource = ctx.resource.as_deref().unwrap_or("-");
    match kind.severity() {
        Severity::Critical => tracing::error!(
            target: "relaykit::classify",
            kind = %kind,
            code,
            request_id,
            operation,
            user,
            resource,
            error = %signal.message,
            "critical error"
        ),
        Severity::Warning => tracing::warn!(
            target: "relaykit::classify",
            kind = %kind,
            code,
            request_id,
            operation,
            user,
            resource,
            error = %signal.message,
            "classified error"
        ),
        Severity::Info => tracing::info!(
            target: "relaykit::classify",
            kind = %kind,
            code,
            request_id,
            operation,
            error = %signal.message,
            "classified error"
        ),
    }
}
