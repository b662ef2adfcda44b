use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed taxonomy of failures surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Network,
    Auth,
    Permission,
    TokenExpired,
    Validation,
    Schema,
    RequiredField,
    Provider,
    ProviderConfig,
    ProviderRateLimit,
    ProviderQuota,
    Database,
    DatabaseConnection,
    Transaction,
    Cache,
    CacheUnavailable,
    RateLimit,
    QuotaExceeded,
    FeatureDisabled,
    FeatureToggle,
    Encryption,
    Decryption,
    Security,
    System,
    ServiceUnavailable,
    Unknown,
}

/// Log tier chosen for a classified error. Never changes the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 28] = [
        ErrorKind::Connection,
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::Auth,
        ErrorKind::Permission,
        ErrorKind::TokenExpired,
        ErrorKind::Validation,
        ErrorKind::Schema,
        ErrorKind::RequiredField,
        ErrorKind::Provider,
        ErrorKind::ProviderConfig,
        ErrorKind::ProviderRateLimit,
        ErrorKind::ProviderQuota,
        ErrorKind::Database,
        ErrorKind::DatabaseConnection,
        ErrorKind::Transaction,
        ErrorKind::Cache,
        ErrorKind::CacheUnavailable,
        ErrorKind::RateLimit,
        ErrorKind::QuotaExceeded,
        ErrorKind::FeatureDisabled,
        ErrorKind::FeatureToggle,
        ErrorKind::Encryption,
        ErrorKind::Decryption,
        ErrorKind::Security,
        ErrorKind::System,
        ErrorKind::ServiceUnavailable,
        ErrorKind::Unknown,
    ];

    /// Wire name, e.g. `RATE_LIMIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Auth => "AUTH",
            ErrorKind::Permission => "PERMISSION",
            ErrorKind::TokenExpired => "TOKEN_EXPIRED",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Schema => "SCHEMA",
            ErrorKind::RequiredField => "REQUIRED_FIELD",
            ErrorKind::Provider => "PROVIDER",
            ErrorKind::ProviderConfig => "PROVIDER_CONFIG",
            ErrorKind::ProviderRateLimit => "PROVIDER_RATE_LIMIT",
            ErrorKind::ProviderQuota => "PROVIDER_QUOTA",
            ErrorKind::Database => "DATABASE",
            ErrorKind::DatabaseConnection => "DATABASE_CONNECTION",
            ErrorKind::Transaction => "TRANSACTION",
            ErrorKind::Cache => "CACHE",
            ErrorKind::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::FeatureDisabled => "FEATURE_DISABLED",
            ErrorKind::FeatureToggle => "FEATURE_TOGGLE",
            ErrorKind::Encryption => "ENCRYPTION",
            ErrorKind::Decryption => "DECRYPTION",
            ErrorKind::Security => "SECURITY",
            ErrorKind::System => "SYSTEM",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Internal, log-facing description.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "Failed to establish a connection to a remote service",
            ErrorKind::Timeout => "Operation exceeded its deadline",
            ErrorKind::Network => "Network error while talking to a remote service",
            ErrorKind::Auth => "Authentication failed",
            ErrorKind::Permission => "Caller lacks permission for this operation",
            ErrorKind::TokenExpired => "Authentication token has expired",
            ErrorKind::Validation => "Input failed validation",
            ErrorKind::Schema => "Payload does not match the expected schema",
            ErrorKind::RequiredField => "A required field is missing",
            ErrorKind::Provider => "Email provider returned an error",
            ErrorKind::ProviderConfig => "Email provider is misconfigured or credentials are invalid",
            ErrorKind::ProviderRateLimit => "Email provider rate limit reached",
            ErrorKind::ProviderQuota => "Email provider quota exhausted",
            ErrorKind::Database => "Database operation failed",
            ErrorKind::DatabaseConnection => "Could not connect to the database",
            ErrorKind::Transaction => "Database transaction failed or was rolled back",
            ErrorKind::Cache => "Cache operation failed",
            ErrorKind::CacheUnavailable => "Shared cache store is unavailable",
            ErrorKind::RateLimit => "Request rate limit exceeded",
            ErrorKind::QuotaExceeded => "Usage quota exceeded",
            ErrorKind::FeatureDisabled => "Requested feature is disabled",
            ErrorKind::FeatureToggle => "Feature toggle lookup failed",
            ErrorKind::Encryption => "Failed to encrypt data",
            ErrorKind::Decryption => "Failed to decrypt data",
            ErrorKind::Security => "Security check failed",
            ErrorKind::System => "Internal system error",
            ErrorKind::ServiceUnavailable => "Upstream service is unavailable",
            ErrorKind::Unknown => "Unclassified error",
        }
    }

    /// Message safe to show to end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Connection | ErrorKind::Network => {
                "We're having trouble connecting. Please check your connection and try again."
            }
            ErrorKind::Timeout => "The request took too long. Please try again.",
            ErrorKind::Auth => "Please sign in to continue.",
            ErrorKind::Permission => "You don't have permission to do that.",
            ErrorKind::TokenExpired => "Your session has expired. Please sign in again.",
            ErrorKind::Validation | ErrorKind::Schema => {
                "Some of the information provided is invalid. Please review and try again."
            }
            ErrorKind::RequiredField => "Please fill in all required fields.",
            ErrorKind::Provider | ErrorKind::ProviderConfig => {
                "We couldn't send your email right now. Please try again later."
            }
            ErrorKind::ProviderRateLimit | ErrorKind::RateLimit => {
                "Too many requests. Please wait a moment and try again."
            }
            ErrorKind::ProviderQuota | ErrorKind::QuotaExceeded => {
                "Your usage limit has been reached. Please contact support to increase it."
            }
            ErrorKind::Database
            | ErrorKind::DatabaseConnection
            | ErrorKind::Transaction
            | ErrorKind::Cache
            | ErrorKind::CacheUnavailable
            | ErrorKind::System
            | ErrorKind::Unknown => "Something went wrong on our end. Please try again later.",
            ErrorKind::FeatureDisabled => "This feature is not available for your organization.",
            ErrorKind::FeatureToggle => "This feature is temporarily unavailable.",
            ErrorKind::Encryption | ErrorKind::Decryption | ErrorKind::Security => {
                "A security error occurred. Please contact support if this continues."
            }
            ErrorKind::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again shortly."
            }
        }
    }

    /// Suggested next step for the caller.
    pub fn recovery(&self) -> &'static str {
        match self {
            ErrorKind::Connection | ErrorKind::Network => "Retry with backoff; check network reachability of the upstream.",
            ErrorKind::Timeout => "Retry the request; consider raising the client timeout.",
            ErrorKind::Auth => "Re-authenticate and retry.",
            ErrorKind::Permission => "Request access from an organization admin.",
            ErrorKind::TokenExpired => "Refresh the session token and retry.",
            ErrorKind::Validation | ErrorKind::Schema => "Fix the highlighted fields and resubmit.",
            ErrorKind::RequiredField => "Provide all required fields and resubmit.",
            ErrorKind::Provider => "Retry later or switch to a fallback provider.",
            ErrorKind::ProviderConfig => "Verify provider API keys and sender configuration.",
            ErrorKind::ProviderRateLimit | ErrorKind::RateLimit => "Wait for the retry-after period before retrying.",
            ErrorKind::ProviderQuota | ErrorKind::QuotaExceeded => "Upgrade the plan or wait for the quota to reset.",
            ErrorKind::Database | ErrorKind::Transaction => "Retry the operation; contact support if it persists.",
            ErrorKind::DatabaseConnection => "Retry shortly; the database may be restarting.",
            ErrorKind::Cache | ErrorKind::CacheUnavailable => "Retry; the system continues without the shared cache.",
            ErrorKind::FeatureDisabled => "Enable the feature in organization settings.",
            ErrorKind::FeatureToggle => "Retry shortly.",
            ErrorKind::Encryption | ErrorKind::Decryption => "Verify encryption keys are configured correctly.",
            ErrorKind::Security => "Contact support.",
            ErrorKind::System | ErrorKind::Unknown => "Retry later; contact support with the error code if it persists.",
            ErrorKind::ServiceUnavailable => "Retry after the suggested delay.",
        }
    }

    /// Documentation slug for kinds that have a help page.
    pub fn documentation_slug(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Auth | ErrorKind::TokenExpired => Some("authentication"),
            ErrorKind::Permission => Some("permissions"),
            ErrorKind::ProviderConfig => Some("email-providers"),
            ErrorKind::RateLimit | ErrorKind::ProviderRateLimit => Some("rate-limits"),
            ErrorKind::QuotaExceeded | ErrorKind::ProviderQuota => Some("quotas"),
            ErrorKind::FeatureDisabled => Some("feature-toggles"),
            _ => None,
        }
    }

    /// Transient kinds a client may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::ServiceUnavailable
                | ErrorKind::DatabaseConnection
                | ErrorKind::CacheUnavailable
                | ErrorKind::System
        )
    }

    /// Suggested client delay in seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ErrorKind::Timeout => Some(5),
            ErrorKind::Network => Some(10),
            ErrorKind::ServiceUnavailable => Some(60),
            ErrorKind::DatabaseConnection => Some(30),
            ErrorKind::RateLimit | ErrorKind::ProviderRateLimit => Some(60),
            _ => None,
        }
    }

    /// Status code for HTTP transports.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Auth | ErrorKind::TokenExpired => 401,
            ErrorKind::Permission => 403,
            ErrorKind::Validation | ErrorKind::Schema | ErrorKind::RequiredField => 400,
            ErrorKind::RateLimit
            | ErrorKind::ProviderRateLimit
            | ErrorKind::QuotaExceeded
            | ErrorKind::ProviderQuota => 429,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::FeatureDisabled => 422,
            _ => 500,
        }
    }

    /// Log tier for this kind.
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::Database
            | ErrorKind::DatabaseConnection
            | ErrorKind::Transaction
            | ErrorKind::Security
            | ErrorKind::System
            | ErrorKind::Encryption
            | ErrorKind::Decryption => Severity::Critical,
            ErrorKind::Auth
            | ErrorKind::TokenExpired
            | ErrorKind::Permission
            | ErrorKind::Provider
            | ErrorKind::ProviderConfig
            | ErrorKind::ProviderRateLimit
            | ErrorKind::ProviderQuota
            | ErrorKind::RateLimit
            | ErrorKind::QuotaExceeded => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
