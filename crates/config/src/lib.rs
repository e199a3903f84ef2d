//! Configuration loading, validation, and management for the Shimeji chat
//! gateway.
//!
//! Loads configuration from `~/.shimeji/gateway.toml` with environment
//! variable overrides. Validates all settings at load time.

pub mod logging;

use serde::{Deserialize, Serialize};
use shimeji_core::{ChatMessage, ConversationRequest, ProviderKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.shimeji/gateway.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Hosted event-stream provider
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Local NDJSON model runner
    #[serde(default)]
    pub local: LocalConfig,

    /// Agent gateway
    #[serde(default)]
    pub agent: AgentConfig,

    /// Connect, request and idle timers
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Agent gateway retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Tracing subscriber settings
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_cloud_model")]
    pub default_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sent as `HTTP-Referer` for provider attribution
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Sent as `X-Title` for provider attribution
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_cloud_endpoint() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_cloud_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_max_tokens() -> u32 {
    256
}
fn default_temperature() -> f32 {
    0.8
}
fn default_referer() -> String {
    "https://shimeji.dev".into()
}
fn default_title() -> String {
    "Shimeji Desktop".into()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_cloud_endpoint(),
            default_model: default_cloud_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            referer: default_referer(),
            title: default_title(),
        }
    }
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("default_model", &self.default_model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("referer", &self.referer)
            .field("title", &self.title)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_local_model")]
    pub default_model: String,
}

fn default_local_endpoint() -> String {
    "http://127.0.0.1:11434".into()
}
fn default_local_model() -> String {
    "gemma3:1b".into()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            endpoint: default_local_endpoint(),
            default_model: default_local_model(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_endpoint")]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Logical agent identity; the session key is derived from it
    #[serde(default = "default_agent_identity")]
    pub identity: String,
}

fn default_agent_endpoint() -> String {
    "ws://127.0.0.1:18789".into()
}
fn default_agent_identity() -> String {
    "desktop-shimeji-1".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_agent_endpoint(),
            token: None,
            identity: default_agent_identity(),
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &redact(&self.token))
            .field("identity", &self.identity)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connect + overall bound for HTTP providers
    #[serde(default = "default_http_request_ms")]
    pub http_request_ms: u64,

    /// Bound on opening the agent gateway connection
    #[serde(default = "default_agent_connect_ms")]
    pub agent_connect_ms: u64,

    /// Overall bound for one agent gateway attempt
    #[serde(default = "default_agent_request_ms")]
    pub agent_request_ms: u64,

    /// Silence after the last fragment that counts as end of reply
    #[serde(default = "default_idle_completion_ms")]
    pub idle_completion_ms: u64,
}

fn default_http_request_ms() -> u64 {
    30_000
}
fn default_agent_connect_ms() -> u64 {
    10_000
}
fn default_agent_request_ms() -> u64 {
    70_000
}
fn default_idle_completion_ms() -> u64 {
    4_500
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_request_ms: default_http_request_ms(),
            agent_connect_ms: default_agent_connect_ms(),
            agent_request_ms: default_agent_request_ms(),
            idle_completion_ms: default_idle_completion_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn http_request(&self) -> Duration {
        Duration::from_millis(self.http_request_ms)
    }

    pub fn agent_connect(&self) -> Duration {
        Duration::from_millis(self.agent_connect_ms)
    }

    pub fn agent_request(&self) -> Duration {
        Duration::from_millis(self.agent_request_ms)
    }

    pub fn idle_completion(&self) -> Duration {
        Duration::from_millis(self.idle_completion_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before attempt `n + 1` is `base_delay_ms * n`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    400
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl GatewayConfig {
    /// Load configuration from the default path (~/.shimeji/gateway.toml).
    ///
    /// Environment variables override the file:
    /// - `SHIMEJI_OPENROUTER_API_KEY`, then `OPENROUTER_API_KEY`
    /// - `SHIMEJI_OLLAMA_URL`
    /// - `SHIMEJI_GATEWAY_URL`, `SHIMEJI_GATEWAY_TOKEN`
    /// - `SHIMEJI_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("gateway.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".shimeji")
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = env_var("SHIMEJI_OPENROUTER_API_KEY").or_else(|| env_var("OPENROUTER_API_KEY")) {
            self.cloud.api_key = Some(key);
        }
        if let Some(url) = env_var("SHIMEJI_OLLAMA_URL") {
            self.local.endpoint = url;
        }
        if let Some(url) = env_var("SHIMEJI_GATEWAY_URL") {
            self.agent.endpoint = url;
        }
        if let Some(token) = env_var("SHIMEJI_GATEWAY_TOKEN") {
            self.agent.token = Some(token);
        }
        if let Some(level) = env_var("SHIMEJI_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.cloud.temperature) {
            return Err(ConfigError::ValidationError(
                "cloud.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.cloud.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "cloud.max_tokens must be > 0".into(),
            ));
        }

        let t = &self.timeouts;
        if t.http_request_ms == 0
            || t.agent_connect_ms == 0
            || t.agent_request_ms == 0
            || t.idle_completion_ms == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0 ms".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// A request for `provider` pre-filled with the configured model,
    /// credentials, endpoint and identity.
    pub fn request_for(&self, provider: ProviderKind, messages: Vec<ChatMessage>) -> ConversationRequest {
        let request = ConversationRequest::new(provider, messages);
        match provider {
            ProviderKind::Cloud => {
                let request = request
                    .with_model(&self.cloud.default_model)
                    .with_endpoint(&self.cloud.endpoint);
                match &self.cloud.api_key {
                    Some(key) => request.with_credentials(key),
                    None => request,
                }
            }
            ProviderKind::Local => request
                .with_model(&self.local.default_model)
                .with_endpoint(&self.local.endpoint),
            ProviderKind::Agent => {
                let request = request
                    .with_endpoint(&self.agent.endpoint)
                    .with_agent_identity(&self.agent.identity);
                match &self.agent.token {
                    Some(token) => request.with_credentials(token),
                    None => request,
                }
            }
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.local.endpoint, "http://127.0.0.1:11434");
        assert_eq!(config.timeouts.idle_completion(), Duration::from_millis(4500));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = GatewayConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cloud.endpoint, config.cloud.endpoint);
        assert_eq!(parsed.timeouts.agent_request_ms, 70_000);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = GatewayConfig::default();
        config.cloud.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn agent_connect_timeout_defaults_and_validates() {
        let mut config = GatewayConfig::default();
        assert_eq!(config.timeouts.agent_connect(), Duration::from_secs(10));

        config.timeouts.agent_connect_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = GatewayConfig::load_from(Path::new("/nonexistent/gateway.toml")).unwrap();
        assert_eq!(config.agent.endpoint, "ws://127.0.0.1:18789");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[timeouts]
idle_completion_ms = 2500

[agent]
identity = "desktop-shimeji-3"
"#
        )
        .unwrap();

        let config = GatewayConfig::load_from(file.path()).unwrap();
        assert_eq!(config.timeouts.idle_completion_ms, 2500);
        assert_eq!(config.timeouts.http_request_ms, 30_000);
        assert_eq!(config.agent.identity, "desktop-shimeji-3");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts\nidle = ").unwrap();
        let result = GatewayConfig::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = GatewayConfig::default();
        config.cloud.api_key = Some("sk-or-v1-secret".into());
        config.agent.token = Some("gw-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-or-v1-secret"));
        assert!(!debug.contains("gw-secret"));
    }

    #[test]
    fn request_for_fills_provider_defaults() {
        let mut config = GatewayConfig::default();
        config.agent.token = Some("tok".into());

        let req = config.request_for(ProviderKind::Agent, vec![ChatMessage::user("hi")]);
        assert_eq!(req.endpoint_url.as_deref(), Some("ws://127.0.0.1:18789"));
        assert_eq!(req.credentials.as_deref(), Some("tok"));
        assert_eq!(req.agent_identity.as_deref(), Some("desktop-shimeji-1"));

        let req = config.request_for(ProviderKind::Local, vec![ChatMessage::user("hi")]);
        assert_eq!(req.model, "gemma3:1b");
        assert!(req.credentials.is_none());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = GatewayConfig::default_toml();
        assert!(toml_str.contains("openrouter.ai"));
        assert!(toml_str.contains("4500"));
    }
}
