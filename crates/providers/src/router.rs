//! Provider router: the single entry point callers use.
//!
//! Builds the canonical message list (persona system prompt first), picks the
//! backend named by the request, and applies that backend's recovery
//! strategy: one-shot fallback for the HTTP providers, bounded retry for the
//! agent gateway.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use shimeji_config::GatewayConfig;
use shimeji_core::{
    ChatEvent, ChatMessage, CompletionResult, ConversationRequest, DeltaSink, IdGenerator, Provider,
    ProviderError, ProviderKind,
};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::event_stream::{self, EventStreamProvider};
use crate::gateway_rpc::{self, GatewayRpcProvider, GatewayTransport, WebSocketTransport};
use crate::ndjson::{self, NdjsonProvider};
use crate::retry::{RetryPolicy, RetryingProvider};

/// Prompt sent by [`ProviderRouter::check`].
pub const CHECK_PROMPT: &str = "Say hello.";

/// Knobs the router applies to every provider it builds.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub cloud_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub local_model: String,
    pub agent_connect_timeout: Duration,
    pub agent_request_timeout: Duration,
    pub idle_completion: Duration,
    pub retry: RetryPolicy,
    /// Deltas buffered between a streaming task and its consumer
    pub stream_buffer: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            cloud_model: "google/gemini-2.0-flash-001".into(),
            max_tokens: event_stream::DEFAULT_MAX_TOKENS,
            temperature: event_stream::DEFAULT_TEMPERATURE,
            referer: Some("https://shimeji.dev".into()),
            title: Some("Shimeji Desktop".into()),
            local_model: ndjson::DEFAULT_MODEL.into(),
            agent_connect_timeout: gateway_rpc::DEFAULT_CONNECT_TIMEOUT,
            agent_request_timeout: gateway_rpc::DEFAULT_REQUEST_TIMEOUT,
            idle_completion: gateway_rpc::DEFAULT_IDLE_COMPLETION,
            retry: RetryPolicy::default(),
            stream_buffer: 64,
        }
    }
}

impl RouterSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            cloud_model: config.cloud.default_model.clone(),
            max_tokens: config.cloud.max_tokens,
            temperature: config.cloud.temperature,
            referer: Some(config.cloud.referer.clone()).filter(|s| !s.is_empty()),
            title: Some(config.cloud.title.clone()).filter(|s| !s.is_empty()),
            local_model: config.local.default_model.clone(),
            agent_connect_timeout: config.timeouts.agent_connect(),
            agent_request_timeout: config.timeouts.agent_request(),
            idle_completion: config.timeouts.idle_completion(),
            retry: RetryPolicy::new(config.retry.max_attempts, config.retry.base_delay()),
            ..Self::default()
        }
    }
}

/// Routes conversation requests to the backend they name.
///
/// Cheap to clone; clones share the HTTP connection pool, the gateway
/// transport and the id generator.
#[derive(Clone)]
pub struct ProviderRouter {
    client: reqwest::Client,
    transport: Arc<dyn GatewayTransport>,
    ids: Arc<IdGenerator>,
    settings: RouterSettings,
}

impl ProviderRouter {
    /// Default settings, a 30 s HTTP client and the WebSocket transport.
    pub fn new() -> Result<Self, ProviderError> {
        let client = crate::http_client(crate::DEFAULT_HTTP_TIMEOUT)?;
        Ok(Self::with_parts(client, Arc::new(WebSocketTransport), RouterSettings::default()))
    }

    pub fn with_parts(
        client: reqwest::Client,
        transport: Arc<dyn GatewayTransport>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            client,
            transport,
            ids: IdGenerator::shared(),
            settings,
        }
    }

    /// Build a router from loaded configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ProviderError> {
        let client = crate::http_client(config.timeouts.http_request())?;
        Ok(Self::with_parts(
            client,
            Arc::new(WebSocketTransport),
            RouterSettings::from_config(config),
        ))
    }

    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Run one request, forwarding deltas to `sink`, and return its terminal
    /// result. Nothing is emitted to `sink` after this returns.
    pub async fn send(&self, request: &ConversationRequest, sink: &DeltaSink) -> CompletionResult {
        if request.messages.is_empty() {
            return Err(ProviderError::EmptyMessage);
        }
        let messages = canonical_messages(request);

        debug!(
            provider = %request.provider,
            model = %request.model,
            persona = request.persona.key(),
            messages = messages.len(),
            "Routing chat request"
        );

        match request.provider {
            ProviderKind::Cloud => {
                let provider = self.cloud(request);
                stream_with_one_shot_fallback(&provider, &messages, sink).await
            }
            ProviderKind::Local => {
                let provider = self.local(request)?;
                stream_with_one_shot_fallback(&provider, &messages, sink).await
            }
            ProviderKind::Agent => self.agent(request).stream(&messages, sink).await,
        }
    }

    /// Run one request without streaming.
    pub async fn complete(&self, request: &ConversationRequest) -> CompletionResult {
        self.send(request, &DeltaSink::disabled()).await
    }

    /// Connectivity check: a one-shot `Say hello.` through the backend,
    /// model, credentials and endpoint of `request`. Its messages are ignored.
    pub async fn check(&self, request: &ConversationRequest) -> CompletionResult {
        let mut hello = request.clone();
        hello.messages = vec![ChatMessage::user(CHECK_PROMPT)];

        let result = self.complete(&hello).await;
        match &result {
            Ok(_) => info!(provider = %request.provider, "Connectivity check passed"),
            Err(e) => info!(provider = %request.provider, kind = %e.kind(), error = %e, "Connectivity check failed"),
        }
        result
    }

    /// Models installed on the local runner at `endpoint` (default address
    /// when `None`).
    pub async fn local_models(&self, endpoint: Option<&str>) -> Result<Vec<String>, ProviderError> {
        NdjsonProvider::new(self.client.clone(), endpoint, &self.settings.local_model)?
            .list_models()
            .await
    }

    /// Run one request on a background task and pull its events.
    ///
    /// The stream yields zero or more [`ChatEvent::Delta`] followed by exactly
    /// one [`ChatEvent::Done`]. Dropping it cancels the request.
    pub fn stream(&self, request: ConversationRequest) -> ChatStream {
        let (sink, rx) = DeltaSink::channel(self.settings.stream_buffer.max(1));
        let router = self.clone();
        let task = tokio::spawn(async move {
            let result = router.send(&request, &sink).await;
            sink.finish(result).await;
        });
        ChatStream {
            events: ReceiverStream::new(rx),
            task,
        }
    }

    fn cloud(&self, request: &ConversationRequest) -> EventStreamProvider {
        let model = non_empty(&request.model).unwrap_or(self.settings.cloud_model.as_str());
        let base_url = request
            .endpoint_url
            .as_deref()
            .and_then(non_empty)
            .unwrap_or(event_stream::DEFAULT_BASE_URL);

        let mut provider = EventStreamProvider::new(self.client.clone(), base_url, request.credentials.clone(), model)
            .with_sampling(self.settings.max_tokens, self.settings.temperature);
        if let (Some(referer), Some(title)) = (&self.settings.referer, &self.settings.title) {
            provider = provider.with_attribution(referer, title);
        }
        provider
    }

    fn local(&self, request: &ConversationRequest) -> Result<NdjsonProvider, ProviderError> {
        let model = non_empty(&request.model).unwrap_or(self.settings.local_model.as_str());
        NdjsonProvider::new(self.client.clone(), request.endpoint_url.as_deref(), model)
    }

    fn agent(&self, request: &ConversationRequest) -> RetryingProvider<GatewayRpcProvider> {
        let provider = GatewayRpcProvider::new(
            self.transport.clone(),
            request.endpoint_url.clone(),
            request.credentials.clone(),
        )
        .with_identity(request.agent_identity.clone())
        .with_ids(self.ids.clone())
        .with_connect_timeout(self.settings.agent_connect_timeout)
        .with_timeouts(self.settings.agent_request_timeout, self.settings.idle_completion);

        RetryingProvider::new(provider, self.settings.retry)
    }
}

/// Persona system prompt followed by the caller's messages.
fn canonical_messages(request: &ConversationRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(ChatMessage::system(request.persona.system_prompt()));
    messages.extend(request.messages.iter().cloned());
    messages
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Stream from `provider`; if that fails for a reason a plain request might
/// not share, ask once more without streaming.
async fn stream_with_one_shot_fallback(
    provider: &dyn Provider,
    messages: &[ChatMessage],
    sink: &DeltaSink,
) -> CompletionResult {
    match provider.stream(messages, sink).await {
        Ok(completion) => Ok(completion),
        Err(e) if e.allows_one_shot_fallback() => {
            info!(
                provider = %provider.name(),
                error = %e,
                kind = %e.kind(),
                "Streaming failed, falling back to one-shot request"
            );
            provider.complete(messages).await
        }
        Err(e) => Err(e),
    }
}

/// Pull side of a streaming request.
///
/// Dropping it aborts the background task, which drops the connection and
/// its timers.
pub struct ChatStream {
    events: ReceiverStream<ChatEvent>,
    task: JoinHandle<()>,
}

impl ChatStream {
    /// Drain the stream, returning the terminal result.
    pub async fn into_result(mut self) -> CompletionResult {
        use futures::StreamExt;

        while let Some(event) = self.next().await {
            if let ChatEvent::Done(result) = event {
                return result;
            }
        }
        Err(ProviderError::StreamInterrupted("request task ended without a result".into()))
    }
}

impl Stream for ChatStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shimeji_core::{Persona, Role};

    #[test]
    fn persona_prompt_is_prepended() {
        let request = ConversationRequest::new(
            ProviderKind::Cloud,
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello"), ChatMessage::user("how are you")],
        )
        .with_persona(Persona::Noir);

        let messages = canonical_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, Persona::Noir.system_prompt());
        assert_eq!(messages[3].content, "how are you");
    }

    #[test]
    fn caller_system_message_is_kept_after_persona() {
        let request = ConversationRequest::new(
            ProviderKind::Local,
            vec![ChatMessage::system("extra rules"), ChatMessage::user("hi")],
        );
        let messages = canonical_messages(&request);
        assert_eq!(messages[0].content, Persona::default().system_prompt());
        assert_eq!(messages[1].content, "extra rules");
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected_before_dispatch() {
        let router = ProviderRouter::new().unwrap();
        let request = ConversationRequest::new(ProviderKind::Cloud, Vec::new());
        let err = router.complete(&request).await.unwrap_err();
        assert_eq!(err, ProviderError::EmptyMessage);
    }

    #[tokio::test]
    async fn invalid_local_endpoint_fails_without_network() {
        let router = ProviderRouter::new().unwrap();
        let request = ConversationRequest::new(ProviderKind::Local, vec![ChatMessage::user("hi")])
            .with_endpoint("https://ollama.example.com");
        let result = router.stream(request).into_result().await;
        assert!(matches!(result, Err(ProviderError::InsecureEndpoint { .. })));
    }

    #[tokio::test]
    async fn missing_cloud_key_fails_fast() {
        let router = ProviderRouter::new().unwrap();
        let request = ConversationRequest::new(ProviderKind::Cloud, vec![ChatMessage::user("hi")]);
        let err = router.complete(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn settings_follow_config() {
        let mut config = GatewayConfig::default();
        config.timeouts.idle_completion_ms = 1_000;
        config.retry.max_attempts = 3;
        config.timeouts.agent_connect_ms = 2_500;
        let settings = RouterSettings::from_config(&config);
        assert_eq!(settings.agent_connect_timeout, Duration::from_millis(2_500));
        assert_eq!(settings.idle_completion, Duration::from_millis(1_000));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.local_model, "gemma3:1b");
    }
}
