//! Agent gateway client over a persistent duplex connection.
//!
//! One attempt walks the session through
//! `Connecting → AwaitingChallenge → Authenticating → Ready →
//! AwaitingCompletion` and ends `Completed` or `Failed`:
//!
//! 1. The gateway opens with a `connect.challenge` event; the client answers
//!    with a `connect` request carrying its token.
//! 2. A successful response (`ok: true` or `hello-ok`) makes the session
//!    ready and exactly one `chat.send` request is issued.
//! 3. Reply text arrives in `event` frames and in responses to the chat
//!    request, either incrementally or cumulatively, and is merged into one
//!    accumulator.
//! 4. The reply ends on an explicit completion marker, on a close, or when
//!    no new text arrived for the idle window after the first fragment.
//!
//! The idle window is a heuristic: a gateway that pauses longer than the
//! window mid-reply gets truncated.

pub mod protocol;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use shimeji_core::message::last_user_text;
use shimeji_core::{
    Accumulator, ChatMessage, Completion, CompletionResult, DeltaSink, GatewaySession, IdGenerator,
    Provider, ProviderError,
};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, trace, warn};

use crate::taxonomy::classify_rpc_error;
use protocol::{EventFrame, InboundFrame, ResponseFrame};
pub use transport::{ConnectionEvent, GatewayConnection, GatewayTransport, WebSocketTransport};

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(70_000);
pub const DEFAULT_IDLE_COMPLETION: Duration = Duration::from_millis(4_500);

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Normalise a gateway address to a `ws://` or `wss://` URL.
///
/// A missing scheme means `ws://`; `http` and `https` are mapped to `ws` and
/// `wss`. Any other scheme, or an unparsable address, is rejected.
pub fn normalize_gateway_url(raw: Option<&str>) -> Result<String, ProviderError> {
    let input = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_GATEWAY_URL);
    let invalid = || ProviderError::InvalidEndpoint {
        url: input.to_string(),
    };

    let has_scheme = input
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic()));
    let with_scheme = if has_scheme {
        input.to_string()
    } else {
        format!("ws://{input}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        _ => return Err(invalid()),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme).map_err(|_| invalid())?;
    }
    Ok(url.to_string())
}

/// Validated inputs of one attempt.
struct Prepared<'a> {
    url: String,
    token: &'a str,
    message: &'a str,
}

/// Where an attempt is in the handshake. `Ready` is transient: the chat
/// request is sent as soon as the session becomes ready.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    AwaitingChallenge,
    Authenticating,
    AwaitingCompletion { chat_id: String },
}

/// Mutable state of one in-flight attempt.
struct Exchange<'a> {
    state: SessionState,
    acc: Accumulator,
    idle_deadline: Option<Instant>,
    idle_window: Duration,
    sink: &'a DeltaSink,
}

impl Exchange<'_> {
    async fn absorb(&mut self, text: Option<String>) {
        let Some(text) = text else { return };
        if let Some(delta) = self.acc.merge(&text) {
            self.idle_deadline = Some(Instant::now() + self.idle_window);
            self.sink.emit(delta).await;
        }
    }

    fn complete(&mut self) -> CompletionResult {
        if self.acc.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Completion::new(std::mem::take(&mut self.acc).into_text()))
    }
}

/// Chat provider backed by the agent gateway.
pub struct GatewayRpcProvider {
    transport: Arc<dyn GatewayTransport>,
    ids: Arc<IdGenerator>,
    endpoint: Option<String>,
    token: Option<String>,
    identity: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
    idle_completion: Duration,
}

impl GatewayRpcProvider {
    pub fn new(transport: Arc<dyn GatewayTransport>, endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            transport,
            ids: IdGenerator::shared(),
            endpoint,
            token,
            identity: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_completion: DEFAULT_IDLE_COMPLETION,
        }
    }

    /// WebSocket transport with default timers.
    pub fn websocket(endpoint: Option<String>, token: Option<String>) -> Self {
        Self::new(Arc::new(WebSocketTransport), endpoint, token)
    }

    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, idle_completion: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.idle_completion = idle_completion;
        self
    }

    /// Bound on opening the connection, within the overall request timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Checks that need no connection: endpoint, token, message.
    fn prepare<'a>(&'a self, messages: &'a [ChatMessage]) -> Result<Prepared<'a>, ProviderError> {
        let url = normalize_gateway_url(self.endpoint.as_deref())?;
        let token = self
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("gateway token missing".into()))?;
        let message = last_user_text(messages)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(ProviderError::EmptyMessage)?;
        Ok(Prepared { url, token, message })
    }

    async fn attempt(&self, prepared: &Prepared<'_>, sink: &DeltaSink) -> CompletionResult {
        let deadline = Instant::now() + self.request_timeout;
        let timed_out = || ProviderError::Timeout(format!("no reply from {} in {:?}", prepared.url, self.request_timeout));

        debug!(endpoint = %prepared.url, "Connecting to agent gateway");
        let connect_budget = self
            .connect_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let mut conn = match timeout(connect_budget, self.transport.connect(&prepared.url)).await {
            Ok(conn) => conn?,
            Err(_) => {
                warn!(endpoint = %prepared.url, timeout = ?connect_budget, "Gateway connect timed out");
                return Err(ProviderError::Connection {
                    endpoint: prepared.url.clone(),
                });
            }
        };

        let mut exchange = Exchange {
            state: SessionState::AwaitingChallenge,
            acc: Accumulator::new(),
            idle_deadline: None,
            idle_window: self.idle_completion,
            sink,
        };

        let result = loop {
            let idle_deadline = exchange.idle_deadline;
            let idle = async move {
                match idle_deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let event = tokio::select! {
                biased;
                _ = sleep_until(deadline) => break Err(timed_out()),
                _ = idle => {
                    debug!(chars = exchange.acc.as_str().len(), "Idle window elapsed, treating reply as complete");
                    break exchange.complete();
                }
                event = conn.next_event() => event,
            };

            match event {
                ConnectionEvent::Text(raw) => {
                    let frame = match serde_json::from_str::<InboundFrame>(&raw) {
                        Ok(frame) => frame,
                        Err(e) => {
                            trace!(error = %e, "Skipping unparseable gateway frame");
                            continue;
                        }
                    };
                    if let Some(done) = self.on_frame(frame, &mut exchange, prepared, conn.as_mut()).await {
                        break done;
                    }
                }
                ConnectionEvent::Closed { code } => {
                    if !exchange.acc.is_empty() {
                        break exchange.complete();
                    }
                    break Err(match code {
                        CLOSE_NORMAL | CLOSE_GOING_AWAY => ProviderError::EmptyResponse,
                        code => ProviderError::ConnectionClosed { code },
                    });
                }
                ConnectionEvent::Error(e) => {
                    if !exchange.acc.is_empty() {
                        debug!(error = %e, "Socket error after content, keeping partial reply");
                        break exchange.complete();
                    }
                    warn!(endpoint = %prepared.url, error = %e, "Gateway connection failed");
                    break Err(ProviderError::Connection {
                        endpoint: prepared.url.clone(),
                    });
                }
            }
        };

        match &result {
            Ok(_) => conn.close(CLOSE_NORMAL, "done").await,
            Err(_) => conn.close(CLOSE_INTERNAL_ERROR, "error").await,
        }
        result
    }

    /// Apply one frame. `Some` ends the attempt.
    async fn on_frame(
        &self,
        frame: InboundFrame,
        exchange: &mut Exchange<'_>,
        prepared: &Prepared<'_>,
        conn: &mut dyn GatewayConnection,
    ) -> Option<CompletionResult> {
        match frame {
            InboundFrame::Event(event) => self.on_event(event, exchange, prepared, conn).await,
            InboundFrame::Res(res) => self.on_response(res, exchange, prepared, conn).await,
            InboundFrame::Other => None,
        }
    }

    async fn on_event(
        &self,
        event: EventFrame,
        exchange: &mut Exchange<'_>,
        prepared: &Prepared<'_>,
        conn: &mut dyn GatewayConnection,
    ) -> Option<CompletionResult> {
        if event.is_challenge() {
            if exchange.state != SessionState::AwaitingChallenge {
                trace!("Ignoring repeated connect challenge");
                return None;
            }
            let request = match protocol::connect_request(&self.ids.next_id("connect"), prepared.token) {
                Ok(request) => request,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = conn.send_text(request).await {
                return Some(Err(e));
            }
            exchange.state = SessionState::Authenticating;
            return None;
        }

        if !matches!(exchange.state, SessionState::AwaitingCompletion { .. }) {
            trace!(event = ?event.event, "Ignoring event before chat request");
            return None;
        }

        exchange.absorb(protocol::extract_text(&event.payload)).await;
        event.signals_completion().then(|| exchange.complete())
    }

    async fn on_response(
        &self,
        res: ResponseFrame,
        exchange: &mut Exchange<'_>,
        prepared: &Prepared<'_>,
        conn: &mut dyn GatewayConnection,
    ) -> Option<CompletionResult> {
        match exchange.state.clone() {
            SessionState::AwaitingChallenge => None,
            SessionState::Authenticating => {
                if res.ok == Some(false) {
                    let reason = res
                        .error
                        .unwrap_or_default()
                        .describe("Authentication failed");
                    warn!(endpoint = %prepared.url, "Gateway rejected credentials");
                    return Some(Err(ProviderError::AuthenticationFailed(reason)));
                }
                if !res.is_hello() {
                    return None;
                }

                let chat_id = self.ids.next_id("chat");
                let session = GatewaySession::new(self.identity.as_deref(), &self.ids);
                debug!(session_key = %session.session_key, "Gateway session ready, sending chat request");
                let request = match protocol::chat_request(&chat_id, &session, prepared.message) {
                    Ok(request) => request,
                    Err(e) => return Some(Err(e)),
                };
                if let Err(e) = conn.send_text(request).await {
                    return Some(Err(e));
                }
                exchange.state = SessionState::AwaitingCompletion { chat_id };
                None
            }
            SessionState::AwaitingCompletion { chat_id } => {
                if !res.answers(&chat_id) {
                    trace!(id = ?res.id, "Ignoring response to another request");
                    return None;
                }
                match res.ok {
                    Some(false) => {
                        let error = res.error.unwrap_or_default();
                        let reason = error.describe("Agent request failed");
                        Some(Err(classify_rpc_error(error.code().as_deref(), Some(&reason))))
                    }
                    Some(true) if !res.is_run_ack() => {
                        exchange.absorb(protocol::extract_text(&res.payload)).await;
                        protocol::signals_completion(&res.payload).then(|| exchange.complete())
                    }
                    _ => None,
                }
            }
        }
    }
}

#[async_trait]
impl Provider for GatewayRpcProvider {
    fn name(&self) -> &str {
        "openclaw"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> CompletionResult {
        self.stream(messages, &DeltaSink::disabled()).await
    }

    /// One attempt: fresh connection, fresh session ids, fresh accumulator.
    async fn stream(&self, messages: &[ChatMessage], sink: &DeltaSink) -> CompletionResult {
        let prepared = self.prepare(messages)?;
        self.attempt(&prepared, sink).await
    }
}
