//! Chat backends for the Shimeji gateway.
//!
//! All backends implement the `shimeji_core::Provider` trait:
//! - [`EventStreamProvider`]: hosted `data:` event-stream API (OpenRouter)
//! - [`NdjsonProvider`]: local newline-delimited JSON runner (Ollama)
//! - [`GatewayRpcProvider`]: agent gateway over WebSocket (OpenClaw)
//!
//! [`ProviderRouter`] is the entry point callers use.

pub mod event_stream;
pub mod gateway_rpc;
mod lines;
pub mod ndjson;
pub mod retry;
pub mod router;
pub mod taxonomy;

use std::time::Duration;

use shimeji_core::ProviderError;

pub use event_stream::EventStreamProvider;
pub use gateway_rpc::{
    ConnectionEvent, GatewayConnection, GatewayRpcProvider, GatewayTransport, WebSocketTransport,
};
pub use ndjson::NdjsonProvider;
pub use retry::{RetryPolicy, RetryState, RetryingProvider};
pub use router::{CHECK_PROMPT, ChatStream, ProviderRouter, RouterSettings};

/// Connect and overall bound for HTTP providers.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP client whose connect and total request time are both bounded by
/// `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))
}
