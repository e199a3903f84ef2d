//! Event-stream (`data:` lines) chat provider.
//!
//! Works with OpenRouter and any OpenAI-compatible `/chat/completions`
//! endpoint that streams `data: <json>` lines terminated by `data: [DONE]`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shimeji_core::{ChatMessage, Completion, CompletionResult, DeltaSink, Provider, ProviderError};
use tracing::{debug, warn};

use crate::lines::{ParsedLine, drain_lines};
use crate::taxonomy::{HttpBackend, classify_http_failure, classify_transport, retry_after_secs};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 256;
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// A hosted chat provider speaking the event-stream protocol.
pub struct EventStreamProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    referer: Option<String>,
    title: Option<String>,
}

impl EventStreamProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: "openrouter".into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            referer: None,
            title: None,
        }
    }

    /// OpenRouter with its default endpoint and a 30 s client.
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        let client = crate::http_client(crate::DEFAULT_HTTP_TIMEOUT)?;
        Ok(Self::new(client, DEFAULT_BASE_URL, Some(api_key.into()), model))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Attribution headers (`HTTP-Referer`, `X-Title`) sent with every request.
    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self.title = Some(title.into());
        self
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("no API key set, add one in settings".into()))
    }

    async fn post(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        };

        debug!(provider = %self.name, model = %self.model, stream, "Sending chat request");

        let mut request = self.client.post(&url).bearer_auth(api_key).json(&body);
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            request = request.header("X-Title", title);
        }
        if stream {
            request = request.header(reqwest::header::ACCEPT, "text/event-stream");
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&e, &self.base_url))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, "Provider returned error");
            return Err(classify_http_failure(status, &error_body, retry_after, HttpBackend::Cloud));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for EventStreamProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> CompletionResult {
        let response = self.post(messages, false).await?;
        let raw = response
            .text()
            .await
            .map_err(|e| classify_transport(&e, &self.base_url))?;
        let parsed: CompletionResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
            .map(Completion::new)
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn stream(&self, messages: &[ChatMessage], sink: &DeltaSink) -> CompletionResult {
        let response = self.post(messages, true).await?;
        let acc = drain_lines(response, &self.base_url, &self.name, parse_event_line, sink).await?;

        if acc.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Completion::new(acc.into_text()))
    }
}

/// Interpret one event-stream line.
///
/// Only `data:` lines count; `[DONE]` ends the stream. The fragment is the
/// first non-empty of `delta.content`, `message.content` and `text` on the
/// first choice.
fn parse_event_line(line: &str) -> Option<ParsedLine> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(ParsedLine {
            fragment: None,
            done: true,
        });
    }
    if data.is_empty() {
        return None;
    }

    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    Some(ParsedLine {
        fragment: chunk.choices.into_iter().next().and_then(StreamChoice::into_text),
        done: false,
    })
}

// --- Wire types (internal) ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ContentField>,
    #[serde(default)]
    message: Option<ContentField>,
    #[serde(default)]
    text: Option<String>,
}

impl StreamChoice {
    fn into_text(self) -> Option<String> {
        let non_empty = |s: &String| !s.is_empty();
        self.delta
            .and_then(|d| d.content)
            .filter(non_empty)
            .or_else(|| self.message.and_then(|m| m.content).filter(non_empty))
            .or_else(|| self.text.filter(non_empty))
    }
}

#[derive(Debug, Deserialize)]
struct ContentField {
    #[serde(default)]
    content: Option<String>,
}
