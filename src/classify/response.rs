use super::kind::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-safe error envelope. Built fresh per failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    pub error: ErrorDetail,
}

/// Body of an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// `{OPERATION}_{KIND}_{time}` debugging handle; not globally unique.
    pub code: String,
    pub message: String,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    pub request_id: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub retryable: bool,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Everything an HTTP layer needs to answer with an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    pub status: u16,
    /// Value for a `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
    pub body: ErrorResponse,
}

impl HttpErrorResponse {
    /// Response headers as `(name, value)` pairs.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Content-Type", "application/json".to_string())];
        if let Some(secs) = self.retry_after {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }

    /// Serialized body; falls back to a minimal `UNKNOWN` envelope.
    pub fn body_json(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|_| {
            r#"{"success":false,"error":{"type":"UNKNOWN"}}"#.to_string()
        })
    }
}
