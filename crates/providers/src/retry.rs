//! Bounded retry around a provider.
//!
//! Only transient failures (connection loss, timeouts, closes before any
//! content, empty replies) are retried. Everything else is returned on first
//! sight. Attempt `n` that fails waits `base_delay * n` before the next one.

use std::time::Duration;

use async_trait::async_trait;
use shimeji_core::{ChatMessage, CompletionResult, DeltaSink, Provider, ProviderError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Progress of one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<ProviderError>,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts,
            last_error: None,
        }
    }

    /// Whether `err` on the current attempt warrants another one.
    pub fn should_retry(&self, err: &ProviderError) -> bool {
        err.is_retryable() && self.attempt < self.max_attempts
    }
}

/// A provider that re-runs its inner provider on transient failures.
///
/// Each attempt is a full call of the inner provider, so a gateway client
/// gets a fresh connection, idempotency key and accumulator per attempt.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Provider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run(&self, messages: &[ChatMessage], sink: &DeltaSink) -> CompletionResult {
        let mut state = RetryState::new(&self.policy);

        loop {
            state.attempt += 1;

            match self.inner.stream(messages, sink).await {
                Ok(completion) => {
                    if let Some(previous) = &state.last_error {
                        info!(
                            provider = %self.inner.name(),
                            attempt = state.attempt,
                            previous_error = %previous,
                            "Retry succeeded"
                        );
                    }
                    return Ok(completion);
                }
                Err(e) if state.should_retry(&e) => {
                    let delay = self.policy.delay_after(state.attempt);
                    warn!(
                        provider = %self.inner.name(),
                        attempt = state.attempt,
                        max_attempts = state.max_attempts,
                        error = %e,
                        delay = ?delay,
                        "Attempt failed, retrying"
                    );
                    state.last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            provider = %self.inner.name(),
                            attempts = state.attempt,
                            error = %e,
                            "Giving up after retries"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<P: Provider> Provider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> CompletionResult {
        self.run(messages, &DeltaSink::disabled()).await
    }

    async fn stream(&self, messages: &[ChatMessage], sink: &DeltaSink) -> CompletionResult {
        self.run(messages, sink).await
    }
}
