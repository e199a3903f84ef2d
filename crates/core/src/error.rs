//! Error types for the Shimeji chat gateway.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Every provider failure is decided once into a [`ProviderError`] variant
//! carrying structured context; [`ProviderError::kind`] maps it onto the
//! canonical [`ErrorKind`] that callers branch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error kinds shared by every provider.
///
/// Callers interpret failures through this enum only, never through
/// provider identity or message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthError,
    QuotaExceeded,
    RateLimited,
    ModelNotFound,
    NetworkUnavailable,
    ProtocolError,
    EmptyResponse,
    Timeout,
    InvalidConfiguration,
    Unknown,
}

impl ErrorKind {
    /// Stable identifier, e.g. `"QuotaExceeded"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthError => "AuthError",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::RateLimited => "RateLimited",
            Self::ModelNotFound => "ModelNotFound",
            Self::NetworkUnavailable => "NetworkUnavailable",
            Self::ProtocolError => "ProtocolError",
            Self::EmptyResponse => "EmptyResponse",
            Self::Timeout => "Timeout",
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::Unknown => "Unknown",
        }
    }

    /// The kinds a UI reports as "no credits or no connection".
    pub fn is_credit_or_network(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::NetworkUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Access to {endpoint} is forbidden")]
    Forbidden { endpoint: String },

    #[error("No credits left or quota exhausted")]
    QuotaExceeded,

    #[error("Rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Cannot connect to {endpoint}")]
    Connection { endpoint: String },

    #[error("Connection closed before any content arrived (code {code})")]
    ConnectionClosed { code: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The agent reported its own timeout in an error response. The request
    /// reached the agent, so it is not re-sent.
    #[error("Agent timed out: {0}")]
    RemoteTimeout(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("No user message to send")]
    EmptyMessage,

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },

    #[error("Only plain http:// endpoints are supported: {url}")]
    InsecureEndpoint { url: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Gateway error: {0}")]
    Remote(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },
}

impl ProviderError {
    /// The canonical kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationFailed(_) | Self::Forbidden { .. } => ErrorKind::AuthError,
            Self::QuotaExceeded => ErrorKind::QuotaExceeded,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            Self::Connection { .. }
            | Self::ConnectionClosed { .. }
            | Self::Network(_)
            | Self::StreamInterrupted(_) => ErrorKind::NetworkUnavailable,
            Self::Timeout(_) | Self::RemoteTimeout(_) => ErrorKind::Timeout,
            Self::EmptyResponse => ErrorKind::EmptyResponse,
            Self::EmptyMessage
            | Self::InvalidEndpoint { .. }
            | Self::InsecureEndpoint { .. }
            | Self::NotConfigured(_) => ErrorKind::InvalidConfiguration,
            Self::Remote(_) | Self::Malformed(_) => ErrorKind::ProtocolError,
            Self::ApiError { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether a fresh attempt against the agent gateway may succeed.
    ///
    /// Connection failures, client-side timeouts, closes before content and
    /// empty responses are transient. Everything else, including a timeout
    /// the agent reported itself, is fatal on first sight.
    pub fn is_retryable(&self) -> bool {
        if matches!(self, Self::RemoteTimeout(_)) {
            return false;
        }
        matches!(
            self.kind(),
            ErrorKind::NetworkUnavailable | ErrorKind::Timeout | ErrorKind::EmptyResponse
        )
    }

    /// Whether a non-streaming request could still produce an answer after
    /// a streaming attempt failed with this error.
    ///
    /// Definitive classifications (auth, quota, rate limit, missing model,
    /// bad configuration) would only be reproduced by the one-shot call.
    pub fn allows_one_shot_fallback(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::AuthError
                | ErrorKind::QuotaExceeded
                | ErrorKind::RateLimited
                | ErrorKind::ModelNotFound
                | ErrorKind::InvalidConfiguration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_class_errors_are_retryable() {
        assert!(ProviderError::Connection { endpoint: "ws://x".into() }.is_retryable());
        assert!(ProviderError::ConnectionClosed { code: 1006 }.is_retryable());
        assert!(ProviderError::Timeout("70s".into()).is_retryable());
        assert!(ProviderError::EmptyResponse.is_retryable());
    }

    #[test]
    fn application_errors_are_fatal() {
        assert!(!ProviderError::AuthenticationFailed("bad token".into()).is_retryable());
        assert!(!ProviderError::Remote("agent busy".into()).is_retryable());
        assert!(!ProviderError::EmptyMessage.is_retryable());
        assert!(!ProviderError::QuotaExceeded.is_retryable());
    }

    #[test]
    fn agent_reported_timeout_is_fatal() {
        let err = ProviderError::RemoteTimeout("agent run exceeded 60s".into());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.is_retryable());
    }

    #[test]
    fn kinds_are_uniform_across_providers() {
        assert_eq!(
            ProviderError::Forbidden { endpoint: "http://127.0.0.1:11434".into() }.kind(),
            ErrorKind::AuthError
        );
        assert_eq!(
            ProviderError::InsecureEndpoint { url: "https://h".into() }.kind(),
            ErrorKind::InvalidConfiguration
        );
        assert_eq!(
            ProviderError::ApiError { status_code: 500, message: "boom".into() }.kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn quota_blocks_one_shot_fallback() {
        assert!(!ProviderError::QuotaExceeded.allows_one_shot_fallback());
        assert!(ProviderError::EmptyResponse.allows_one_shot_fallback());
        assert!(ProviderError::StreamInterrupted("reset".into()).allows_one_shot_fallback());
    }

    #[test]
    fn provider_error_displays_context() {
        let err = ProviderError::ModelNotFound { model: "gemma3:1b".into() };
        assert!(err.to_string().contains("gemma3:1b"));

        let err = ProviderError::ApiError { status_code: 500, message: "Internal".into() };
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn credit_or_network_subset() {
        assert!(ErrorKind::QuotaExceeded.is_credit_or_network());
        assert!(ErrorKind::NetworkUnavailable.is_credit_or_network());
        assert!(!ErrorKind::Timeout.is_credit_or_network());
        assert_eq!(ErrorKind::EmptyResponse.to_string(), "EmptyResponse");
    }
}
