//! Classification of raw transport failures into [`ProviderError`].
//!
//! HTTP failures are decided from the status code and, where the status is
//! ambiguous, from the response body. Gateway failures are decided from the
//! frame-level error code. Every failure is classified here exactly once;
//! the router only ever sees the resulting variant.

use serde::Deserialize;
use shimeji_core::ProviderError;

/// Maximum number of characters of an unclassified error body kept in the
/// error message.
pub const ERROR_BODY_LIMIT: usize = 160;

/// Which HTTP backend produced a failure.
///
/// The local runner has backend-specific statuses (403 for origin checks,
/// 404 for missing models) that mean something else on the hosted API.
#[derive(Debug, Clone, Copy)]
pub enum HttpBackend<'a> {
    Cloud,
    Local { endpoint: &'a str, model: &'a str },
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl ErrorDetail {
    fn is_insufficient_quota(&self) -> bool {
        let code = self.code.as_ref().and_then(|c| c.as_str());
        code == Some("insufficient_quota") || self.kind.as_deref() == Some("insufficient_quota")
    }
}

/// Classify a non-2xx HTTP response.
pub fn classify_http_failure(
    status: u16,
    body: &str,
    retry_after_secs: Option<u64>,
    backend: HttpBackend<'_>,
) -> ProviderError {
    match status {
        401 => {
            return ProviderError::AuthenticationFailed(
                "Invalid API key. Check the key in settings".into(),
            );
        }
        402 => return ProviderError::QuotaExceeded,
        429 => {
            let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
            let out_of_credit = envelope
                .error
                .as_ref()
                .is_some_and(ErrorDetail::is_insufficient_quota);
            return if out_of_credit {
                ProviderError::QuotaExceeded
            } else {
                ProviderError::RateLimited { retry_after_secs }
            };
        }
        _ => {}
    }

    if let HttpBackend::Local { endpoint, model } = backend {
        if status == 403 {
            return ProviderError::Forbidden {
                endpoint: endpoint.to_string(),
            };
        }
        let lower = body.to_lowercase();
        if status == 404 || lower.contains("not found") || lower.contains("does not exist") {
            return ProviderError::ModelNotFound {
                model: model.to_string(),
            };
        }
    }

    unclassified(status, body)
}

/// Classify a non-2xx answer to the local runner's model listing.
///
/// Only the origin check is meaningful here; a 404 means an old or foreign
/// server, not a missing model.
pub fn classify_model_list_failure(status: u16, body: &str, endpoint: &str) -> ProviderError {
    if status == 403 {
        return ProviderError::Forbidden {
            endpoint: endpoint.to_string(),
        };
    }
    unclassified(status, body)
}

/// Classify a failure to send a request or to read its body.
///
/// Elapsed timers become [`ProviderError::Timeout`]; refused or unreachable
/// peers become [`ProviderError::Connection`].
pub fn classify_transport(err: &reqwest::Error, endpoint: &str) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(format!("no response from {endpoint}"))
    } else if err.is_connect() {
        ProviderError::Connection {
            endpoint: endpoint.to_string(),
        }
    } else if err.is_body() || err.is_decode() {
        ProviderError::StreamInterrupted(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Classify an error response from the agent gateway.
///
/// `code` is the frame-level error code when the gateway sent one.
pub fn classify_rpc_error(code: Option<&str>, message: Option<&str>) -> ProviderError {
    let message = message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("request failed");
    let code = code.unwrap_or_default().to_ascii_lowercase();

    if code.contains("auth") || code.contains("unauthorized") || code.contains("forbidden") {
        ProviderError::AuthenticationFailed(message.to_string())
    } else if code.contains("quota") || code.contains("credit") {
        ProviderError::QuotaExceeded
    } else if code.contains("rate") {
        ProviderError::RateLimited {
            retry_after_secs: None,
        }
    } else if code.contains("timeout") {
        ProviderError::RemoteTimeout(message.to_string())
    } else {
        ProviderError::Remote(message.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// `ApiError` carrying at most [`ERROR_BODY_LIMIT`] characters of the body.
fn unclassified(status: u16, body: &str) -> ProviderError {
    let message: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    ProviderError::ApiError {
        status_code: status,
        message: if message.is_empty() {
            "Unknown error".into()
        } else {
            message
        },
    }
}
