// src/error.rs
// Error taxonomy shared by every component, plus the transport classifier

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable error kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Plan build, argument schemas
    Validation,
    /// Unknown tool or record
    NotFound,
    /// Missing or expired credential
    Unauthorized,
    /// Role gate rejected the caller
    Forbidden,
    /// Upstream 429
    RateLimited,
    /// Any bounded wait expired
    Timeout,
    /// Connection refused or reset
    Network,
    /// Framing or decoding failure
    Transport,
    /// Tool server returned an error
    Remote,
    /// Bug catch-all
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Transport => "transport",
            ErrorKind::Remote => "remote",
            ErrorKind::Internal => "internal",
        }
    }

    /// Default retryability per kind; `Remote` is decided by the classifier
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Network
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the drift runtime
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DriftError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
    retryable: Option<bool>,
}

/// Convenience alias used across component boundaries
pub type Result<T> = std::result::Result<T, DriftError>;

impl DriftError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            retryable: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the kind-derived retryability (e.g. an idempotent remote read)
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable.unwrap_or_else(|| self.kind.is_retryable())
    }

    /// Uniform envelope surfaced across the RPC boundary
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind,
            message: match self.kind {
                // Bug details stay out of caller-visible messages
                ErrorKind::Internal => "internal error".to_string(),
                _ => self.message.clone(),
            },
            details: self.details.clone(),
            retryable: self.is_retryable(),
        }
    }
}

/// Serialized error form: `{kind, message, details?, retryable}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl From<serde_json::Error> for DriftError {
    fn from(err: serde_json::Error) -> Self {
        DriftError::transport(format!("JSON decode failed: {err}"))
    }
}

impl From<std::io::Error> for DriftError {
    fn from(err: std::io::Error) -> Self {
        classify_io(&err)
    }
}

impl From<reqwest::Error> for DriftError {
    fn from(err: reqwest::Error) -> Self {
        classify_http(&err)
    }
}

impl From<anyhow::Error> for DriftError {
    fn from(err: anyhow::Error) -> Self {
        DriftError::internal(err.to_string())
    }
}

/// Map an I/O error onto the taxonomy
pub fn classify_io(err: &std::io::Error) -> DriftError {
    use std::io::ErrorKind as IoKind;
    match err.kind() {
        IoKind::ConnectionRefused | IoKind::ConnectionReset | IoKind::ConnectionAborted
        | IoKind::BrokenPipe | IoKind::NotConnected => {
            DriftError::network(format!("connection failed: {err}"))
        }
        IoKind::TimedOut => DriftError::timeout(format!("I/O timed out: {err}")),
        IoKind::NotFound => DriftError::not_found(err.to_string()),
        IoKind::PermissionDenied => DriftError::forbidden(err.to_string()),
        _ => DriftError::transport(format!("I/O error: {err}")),
    }
}

/// Map a reqwest error onto the taxonomy
pub fn classify_http(err: &reqwest::Error) -> DriftError {
    if err.is_timeout() {
        return DriftError::timeout(format!("HTTP request timed out: {err}"));
    }
    if err.is_connect() {
        return DriftError::network(format!("connection failed: {err}"));
    }
    if let Some(status) = err.status() {
        return classify_status(status.as_u16(), &err.to_string());
    }
    if err.is_decode() {
        return DriftError::transport(format!("response decode failed: {err}"));
    }
    DriftError::network(err.to_string())
}

/// Map an HTTP status onto the taxonomy
pub fn classify_status(status: u16, message: &str) -> DriftError {
    match status {
        401 => DriftError::unauthorized(format!(
            "{message} (credential missing or expired; re-authenticate and retry)"
        )),
        403 => DriftError::forbidden(message.to_string()),
        404 => DriftError::not_found(message.to_string()),
        408 => DriftError::timeout(message.to_string()),
        429 => DriftError::rate_limited(message.to_string()),
        400..=499 => DriftError::validation(message.to_string()),
        500..=599 => DriftError::remote(message.to_string()).with_retryable(true),
        _ => DriftError::remote(message.to_string()),
    }
}

/// Map a JSON-RPC error object from a tool server onto the taxonomy
pub fn classify_rpc(code: i32, message: &str) -> DriftError {
    match code {
        -32700 | -32600 | -32603 => DriftError::transport(format!("rpc error {code}: {message}")),
        -32601 => DriftError::not_found(format!("rpc method not found: {message}")),
        -32602 => DriftError::validation(format!("invalid rpc params: {message}")),
        _ => DriftError::remote(format!("rpc error {code}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_retryability_matrix() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Forbidden.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
    }

    #[test]
    fn test_retryable_override() {
        let err = DriftError::remote("upstream 500").with_retryable(true);
        assert!(err.is_retryable());

        let err = DriftError::network("refused").with_retryable(false);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_envelope_hides_internal_details() {
        let err = DriftError::internal("index out of bounds at executor.rs:42");
        let envelope = err.envelope();
        assert_eq!(envelope.kind, ErrorKind::Internal);
        assert_eq!(envelope.message, "internal error");
        assert!(!envelope.retryable);
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = DriftError::not_found("tool 'snow_query' not found").envelope();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["retryable"], false);
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(429, "slow down").kind, ErrorKind::RateLimited);
        assert_eq!(classify_status(401, "no token").kind, ErrorKind::Unauthorized);
        assert_eq!(classify_status(403, "nope").kind, ErrorKind::Forbidden);
        assert_eq!(classify_status(404, "gone").kind, ErrorKind::NotFound);
        assert_eq!(classify_status(422, "bad body").kind, ErrorKind::Validation);

        let server_err = classify_status(503, "unavailable");
        assert_eq!(server_err.kind, ErrorKind::Remote);
        assert!(server_err.is_retryable());
    }

    #[test]
    fn test_classify_rpc() {
        assert_eq!(classify_rpc(-32601, "no such method").kind, ErrorKind::NotFound);
        assert_eq!(classify_rpc(-32602, "bad params").kind, ErrorKind::Validation);
        assert_eq!(classify_rpc(-32700, "parse error").kind, ErrorKind::Transport);
        assert_eq!(classify_rpc(1000, "tool blew up").kind, ErrorKind::Remote);
    }

    #[test]
    fn test_classify_io() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_io(&refused).kind, ErrorKind::Network);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify_io(&timed_out).kind, ErrorKind::Timeout);
    }
}
