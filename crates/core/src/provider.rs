//! Provider trait: the abstraction over chat backends.
//!
//! A Provider knows how to send a conversation to one backend and get the
//! assistant reply back, either in one shot or as a stream of deltas.
//!
//! Implementations: event-stream HTTP, NDJSON HTTP, agent gateway RPC.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProviderError};
use crate::message::ChatMessage;
use crate::stream::{Accumulator, DeltaSink};

/// A finished assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The single terminal result of one request.
pub type CompletionResult = std::result::Result<Completion, ProviderError>;

/// Serialisable form of a [`CompletionResult`] for collaborators on the far
/// side of an IPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionOutcome {
    Success {
        ok: bool,
        text: String,
    },
    Failure {
        ok: bool,
        #[serde(rename = "errorKind")]
        error_kind: ErrorKind,
        message: String,
    },
}

impl From<&CompletionResult> for CompletionOutcome {
    fn from(result: &CompletionResult) -> Self {
        match result {
            Ok(completion) => Self::Success {
                ok: true,
                text: completion.text.clone(),
            },
            Err(err) => Self::Failure {
                ok: false,
                error_kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// The core Provider trait.
///
/// Every backend implements this trait; the router calls `stream()` or
/// `complete()` without knowing which wire protocol sits underneath.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g. "openrouter", "ollama").
    fn name(&self) -> &str;

    /// Send the conversation and wait for the complete reply.
    async fn complete(&self, messages: &[ChatMessage]) -> CompletionResult;

    /// Send the conversation, forwarding deltas to `sink` as they arrive.
    ///
    /// Default implementation calls `complete()` and emits the whole reply as
    /// a single delta.
    async fn stream(&self, messages: &[ChatMessage], sink: &DeltaSink) -> CompletionResult {
        let completion = self.complete(messages).await?;
        let mut acc = Accumulator::new();
        if let Some(delta) = acc.append(&completion.text) {
            sink.emit(delta).await;
        }
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ChatEvent;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> CompletionResult {
            Ok(Completion::new(messages.last().map(|m| m.content.clone()).unwrap_or_default()))
        }
    }

    #[tokio::test]
    async fn default_stream_emits_single_delta() {
        let (sink, mut rx) = DeltaSink::channel(4);
        let result = Echo.stream(&[ChatMessage::user("ping")], &sink).await.unwrap();
        drop(sink);

        assert_eq!(result.text, "ping");
        match rx.recv().await {
            Some(ChatEvent::Delta(d)) => assert_eq!(d.fragment, "ping"),
            other => panic!("Expected delta, got: {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn outcome_serializes_failure_with_kind() {
        let result: CompletionResult = Err(ProviderError::QuotaExceeded);
        let json = serde_json::to_value(CompletionOutcome::from(&result)).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["errorKind"], "QuotaExceeded");
    }

    #[test]
    fn outcome_serializes_success() {
        let result: CompletionResult = Ok(Completion::new("Hi"));
        let json = serde_json::to_value(CompletionOutcome::from(&result)).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "text": "Hi"}));
    }
}
