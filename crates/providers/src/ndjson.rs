//! Newline-delimited JSON chat provider for local model runners (Ollama).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use shimeji_core::{ChatMessage, Completion, CompletionResult, DeltaSink, Provider, ProviderError};
use tracing::{debug, warn};

use crate::lines::{ParsedLine, drain_lines};
use crate::taxonomy::{HttpBackend, classify_http_failure, classify_model_list_failure, classify_transport};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "gemma3:1b";

/// Bound on the `/api/tags` model listing.
pub const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(12);

/// Resolve a user-supplied runner address to its origin.
///
/// Accepts a bare `host:port` or a full URL. A missing scheme means
/// `http://`; path, query and fragment are dropped. Only plain `http` is
/// accepted.
pub fn normalize_endpoint(raw: Option<&str>) -> Result<String, ProviderError> {
    let input = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BASE_URL);

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{input}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| ProviderError::InvalidEndpoint {
        url: input.to_string(),
    })?;

    if url.scheme() != "http" {
        return Err(ProviderError::InsecureEndpoint {
            url: input.to_string(),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProviderError::InvalidEndpoint {
            url: input.to_string(),
        });
    }

    Ok(url.origin().ascii_serialization())
}

/// A local model runner speaking the NDJSON `/api/chat` protocol.
pub struct NdjsonProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl NdjsonProvider {
    /// `endpoint` is normalised with [`normalize_endpoint`]; an empty model
    /// means [`DEFAULT_MODEL`].
    pub fn new(client: reqwest::Client, endpoint: Option<&str>, model: &str) -> Result<Self, ProviderError> {
        let model = model.trim();
        Ok(Self {
            name: "ollama".into(),
            client,
            base_url: normalize_endpoint(endpoint)?,
            model: if model.is_empty() { DEFAULT_MODEL } else { model }.to_string(),
        })
    }

    /// Ollama on its default address with a 30 s client.
    pub fn ollama(model: &str) -> Result<Self, ProviderError> {
        let client = crate::http_client(crate::DEFAULT_HTTP_TIMEOUT)?;
        Self::new(client, None, model)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models installed on the runner (`GET /api/tags`).
    ///
    /// A refused or unreachable runner is reported as
    /// [`ProviderError::Connection`]; 403 as [`ProviderError::Forbidden`].
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        debug!(provider = %self.name, endpoint = %self.base_url, "Listing local models");

        let unreachable = || ProviderError::Connection {
            endpoint: self.base_url.clone(),
        };
        let response = self
            .client
            .get(&url)
            .timeout(MODEL_LIST_TIMEOUT)
            .send()
            .await
            .map_err(|_| unreachable())?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, "Model listing failed");
            return Err(classify_model_list_failure(status, &error_body, &self.base_url));
        }

        let raw = response.text().await.map_err(|_| unreachable())?;
        let tags: TagsResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse model list: {e}")))?;

        Ok(tags
            .models
            .into_iter()
            .filter_map(|m| m.name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    async fn post(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream,
        };

        debug!(provider = %self.name, model = %self.model, endpoint = %self.base_url, stream, "Sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    classify_transport(&e, &self.base_url)
                } else {
                    ProviderError::Connection {
                        endpoint: self.base_url.clone(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, "Local runner returned error");
            return Err(classify_http_failure(
                status,
                &error_body,
                None,
                HttpBackend::Local {
                    endpoint: &self.base_url,
                    model: &self.model,
                },
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for NdjsonProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> CompletionResult {
        let response = self.post(messages, false).await?;
        let raw = response
            .text()
            .await
            .map_err(|e| classify_transport(&e, &self.base_url))?;
        let parsed: ChatLine = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {e}")))?;

        parsed
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
            .map(Completion::new)
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn stream(&self, messages: &[ChatMessage], sink: &DeltaSink) -> CompletionResult {
        let response = self.post(messages, true).await?;
        let acc = drain_lines(response, &self.base_url, &self.name, parse_ndjson_line, sink).await?;

        if acc.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(Completion::new(acc.into_text()))
    }
}

/// Interpret one NDJSON line: `message.content` or a flat `response`, with
/// `done: true` ending the stream after that line's content.
fn parse_ndjson_line(line: &str) -> Option<ParsedLine> {
    let parsed: ChatLine = serde_json::from_str(line).ok()?;
    let fragment = parsed
        .message
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty())
        .or_else(|| parsed.response.filter(|r| !r.is_empty()));

    Some(ParsedLine {
        fragment,
        done: parsed.done,
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    #[serde(default)]
    content: Option<String>,
}
