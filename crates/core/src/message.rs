//! Message and request domain types.
//!
//! These are the value objects a collaborator hands to the gateway:
//! an ordered conversation plus the provider selection it should go to.

use serde::{Deserialize, Serialize};

use crate::persona::Persona;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, style rules)
    System,
    /// The end user
    User,
    /// The AI companion
    Assistant,
}

/// A single message in a conversation.
///
/// Serialises to the `{role, content}` shape all three backends accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Text of the most recent user message, trimmed.
///
/// Scans from the end of the conversation; returns `None` when there is no
/// user message or it is blank.
pub fn last_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .filter(|text| !text.is_empty())
}

/// Which backend a conversation is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted event-stream API (OpenRouter / OpenAI style)
    Cloud,
    /// Local model runner speaking newline-delimited JSON (Ollama style)
    Local,
    /// Agent gateway over a persistent WebSocket (OpenClaw style)
    Agent,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Local => "local",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation plus everything needed to route it to one provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    /// Ordered conversation, oldest first
    pub messages: Vec<ChatMessage>,

    /// Target backend
    pub provider: ProviderKind,

    /// Model id (ignored by the agent gateway)
    #[serde(default)]
    pub model: String,

    /// API key (cloud) or gateway token (agent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,

    /// Provider endpoint; each client applies its own default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    /// Logical agent identity, used to derive the gateway session key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_identity: Option<String>,

    /// Persona the system message is built from
    #[serde(default)]
    pub persona: Persona,
}

impl ConversationRequest {
    pub fn new(provider: ProviderKind, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            provider,
            model: String::new(),
            credentials: None,
            endpoint_url: None,
            agent_identity: None,
            persona: Persona::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_agent_identity(mut self, identity: impl Into<String>) -> Self {
        self.agent_identity = Some(identity.into());
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }
}

impl std::fmt::Debug for ConversationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRequest")
            .field("messages", &self.messages.len())
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "[REDACTED]"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .field("agent_identity", &self.agent_identity)
            .field("persona", &self.persona.key())
            .finish()
    }
}
