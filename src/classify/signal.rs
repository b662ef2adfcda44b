use super::kind::ErrorKind;
use crate::cache::CacheError;
use crate::error::BreakerError;
use serde_json::Value;
use std::io;

/// One problem reported by a schema validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Dotted path of the offending field.
    pub path: String,
    /// Validator message.
    pub message: String,
    /// The field was absent rather than malformed.
    pub missing: bool,
}

/// What a failure looks like to the classifier.
///
/// Each field is a capability ("has HTTP status", "has provider tag",
/// "has database code"); classification checks them in a fixed order. Build
/// one directly or convert from common error types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorSignal {
    pub message: String,
    /// Type or variant name of the original error.
    pub name: Option<String>,
    /// Low-level socket code such as `ECONNREFUSED`.
    pub network_code: Option<String>,
    pub http_status: Option<u16>,
    /// Provider that produced the error (e.g. `sendgrid`).
    pub provider: Option<String>,
    /// Driver error code (SQLSTATE or ORM code).
    pub database_code: Option<String>,
    /// Issues from a schema validator; presence marks a validation failure.
    pub schema_issues: Option<Vec<SchemaIssue>>,
    /// The error was raised because a feature toggle is off.
    pub feature_disabled: bool,
    /// Preset user-facing message, overriding the table.
    pub user_message: Option<String>,
    pub details: Option<Value>,
    /// Already classified upstream; wins over every other check.
    pub kind: Option<ErrorKind>,
}

impl ErrorSignal {
    /// Signal carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }

    /// Signal for any displayable error, named after its type.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self::new(err.to_string()).name(name)
    }

    /// Type or variant name of the source error.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Socket code such as `ECONNREFUSED`; matched case-insensitively.
    pub fn network_code(mut self, code: impl Into<String>) -> Self {
        self.network_code = Some(code.into());
        self
    }

    /// Status returned by an upstream HTTP call.
    pub fn http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Tag the signal with the provider that raised it.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// SQLSTATE or ORM error code.
    pub fn database_code(mut self, code: impl Into<String>) -> Self {
        self.database_code = Some(code.into());
        self
    }

    /// Append a schema-validation issue.
    pub fn schema_issue(mut self, issue: SchemaIssue) -> Self {
        self.schema_issues.get_or_insert_with(Vec::new).push(issue);
        self
    }

    /// Mark the failure as caused by a disabled feature.
    pub fn feature_disabled(mut self) -> Self {
        self.feature_disabled = true;
        self
    }

    /// Preset the user-facing message.
    pub fn user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Structured details copied into the response.
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Skip classification and use `kind` directly.
    pub fn kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Map this signal to exactly one [`ErrorKind`]. First match wins.
    pub fn classify(&self) -> ErrorKind {
        let msg = self.message.to_lowercase();
        let name = self.name.as_deref().unwrap_or("").to_lowercase();

        if let Some(kind) = self.kind {
            return kind;
        }
        if let Some(kind) = self.network_code.as_deref().and_then(classify_network_code) {
            return kind;
        }
        if let Some(kind) = self.http_status.and_then(|s| classify_status(s, &msg)) {
            return kind;
        }
        if self.provider.is_some() {
            return classify_provider(&msg);
        }
        if let Some(code) = &self.database_code {
            return classify_database(code, &msg);
        }
        if let Some(issues) = &self.schema_issues {
            return if issues.iter().any(|i| i.missing) {
                ErrorKind::RequiredField
            } else {
                ErrorKind::Validation
            };
        }
        if self.feature_disabled || msg.contains("feature disabled") || msg.contains("feature is disabled") {
            return ErrorKind::FeatureDisabled;
        }
        if msg.contains("feature toggle") || name.contains("featuretoggle") {
            return ErrorKind::FeatureToggle;
        }
        if msg.contains("decrypt") || name.contains("decrypt") {
            return ErrorKind::Decryption;
        }
        if msg.contains("encrypt") || name.contains("encrypt") {
            return ErrorKind::Encryption;
        }
        if msg.contains("cache") || msg.contains("redis") || name.contains("cache") {
            return if msg.contains("unavailable") || msg.contains("connect") {
                ErrorKind::CacheUnavailable
            } else {
                ErrorKind::Cache
            };
        }
        ErrorKind::Unknown
    }
}

fn classify_network_code(code: &str) -> Option<ErrorKind> {
    match code.to_ascii_uppercase().as_str() {
        "ECONNREFUSED" | "ECONNRESET" | "ENOTFOUND" | "ECONNABORTED" => Some(ErrorKind::Connection),
        "ETIMEDOUT" | "ESOCKETTIMEDOUT" => Some(ErrorKind::Timeout),
        "EPIPE" | "ENETUNREACH" | "EHOSTUNREACH" | "EAI_AGAIN" | "ENETDOWN" => Some(ErrorKind::Network),
        _ => None,
    }
}

fn classify_status(status: u16, msg: &str) -> Option<ErrorKind> {
    match status {
        401 if msg.contains("expired") => Some(ErrorKind::TokenExpired),
        401 => Some(ErrorKind::Auth),
        403 => Some(ErrorKind::Permission),
        422 => Some(ErrorKind::Validation),
        429 => Some(ErrorKind::RateLimit),
        502..=504 => Some(ErrorKind::ServiceUnavailable),
        _ => None,
    }
}

fn classify_provider(msg: &str) -> ErrorKind {
    if msg.contains("config") || msg.contains("credential") || msg.contains("api key") {
        ErrorKind::ProviderConfig
    } else if msg.contains("rate limit") || msg.contains("too many requests") {
        ErrorKind::ProviderRateLimit
    } else if msg.contains("quota") {
        ErrorKind::ProviderQuota
    } else {
        ErrorKind::Provider
    }
}

fn classify_database(code: &str, msg: &str) -> ErrorKind {
    let code = code.to_ascii_uppercase();
    if code.starts_with("08") || code.starts_with("P1") || msg.contains("connect") {
        ErrorKind::DatabaseConnection
    } else if code.starts_with("40")
        || code == "P2034"
        || msg.contains("transaction")
        || msg.contains("deadlock")
    {
        ErrorKind::Transaction
    } else {
        ErrorKind::Database
    }
}

fn io_kind(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
        io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        io::ErrorKind::BrokenPipe => Some("EPIPE"),
        io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => Some("ENETUNREACH"),
        _ => None,
    }
}

/// Conversion of a library or domain error into an [`ErrorSignal`].
///
/// Implement it for your own error types to classify them through
/// [`BreakerError`] as well.
pub trait ToSignal {
    /// Describe `self` to the classifier.
    fn to_signal(&self) -> ErrorSignal;
}

impl ToSignal for io::Error {
    fn to_signal(&self) -> ErrorSignal {
        let signal = ErrorSignal::new(self.to_string()).name("io::Error");
        match io_kind(self.kind()) {
            Some(code) => signal.network_code(code),
            None => signal.kind(ErrorKind::System),
        }
    }
}

impl ToSignal for serde_json::Error {
    fn to_signal(&self) -> ErrorSignal {
        let message = self.to_string();
        let issue = SchemaIssue {
            path: format!("line {}, column {}", self.line(), self.column()),
            missing: message.starts_with("missing field"),
            message: message.clone(),
        };
        ErrorSignal::new(message).name("serde_json::Error").schema_issue(issue)
    }
}

impl ToSignal for CacheError {
    fn to_signal(&self) -> ErrorSignal {
        let kind = if self.is_unavailable() { ErrorKind::CacheUnavailable } else { ErrorKind::Cache };
        ErrorSignal::new(self.to_string()).name("CacheError").kind(kind)
    }
}

/// Open circuits classify as service-unavailable; inner errors by their own signal.
impl<E: ToSignal + std::fmt::Display> ToSignal for BreakerError<E> {
    fn to_signal(&self) -> ErrorSignal {
        match self {
            BreakerError::Open { name, retry_in, .. } => ErrorSignal::new(self.to_string())
                .name("CircuitOpen")
                .kind(ErrorKind::ServiceUnavailable)
                .details(serde_json::json!({
                    "breaker": name,
                    "retryInMs": u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                })),
            BreakerError::Inner(inner) => inner.to_signal(),
        }
    }
}

impl<T: ToSignal + ?Sized> From<&T> for ErrorSignal {
    fn from(err: &T) -> Self {
        err.to_signal()
    }
}

impl From<io::Error> for ErrorSignal {
    fn from(err: io::Error) -> Self {
        err.to_signal()
    }
}

impl From<serde_json::Error> for ErrorSignal {
    fn from(err: serde_json::Error) -> Self {
        err.to_signal()
    }
}

impl From<CacheError> for ErrorSignal {
    fn from(err: CacheError) -> Self {
        err.to_signal()
    }
}

impl<E: ToSignal + std::fmt::Display> From<BreakerError<E>> for ErrorSignal {
    fn from(err: BreakerError<E>) -> Self {
        err.to_signal()
    }
}
