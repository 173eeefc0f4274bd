//! # Gateway
//!
//! The capability the refinement loop talks to: an ordered list of messages
//! goes in, generated text comes out, and any failure is an
//! `ExternalService` error.
//!
//! `ProviderGateway` adapts an [`LlmProvider`]; `Retrying` layers backoff on
//! top of any gateway so callers above it stay retry-agnostic.

use crate::error::{self, Error, Result};
use crate::provider::{ChatMessage, CompletionRequest, LlmProvider};
use std::time::Duration;

/// Text-generation capability
#[allow(async_fn_in_trait)]
pub trait Gateway {
    /// Short name used in logs and error context
    fn name(&self) -> &str;

    /// Send the messages and return the generated text
    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

impl<G: Gateway> Gateway for &G {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String> {
        (**self).send(messages).await
    }
}

// ============================================================================
// Provider adapter
// ============================================================================

/// Adapts an [`LlmProvider`] to the [`Gateway`] capability
pub struct ProviderGateway<P> {
    provider: P,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

impl<P: LlmProvider> ProviderGateway<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: LlmProvider> Gateway for ProviderGateway<P> {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let mut request = CompletionRequest::new(messages);
        request.model = self.model.clone();
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| error::external_service(self.provider.name(), e))?;

        tracing::debug!(
            provider = self.provider.name(),
            model = %response.model,
            finish_reason = ?response.finish_reason,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "completion received"
        );

        match response.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(error::empty_response(self.provider.name())),
        }
    }
}

// ============================================================================
// Retry wrapper
// ============================================================================

/// Exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Wait before the next attempt. A server-sent `Retry-After` wins over a
    /// shorter backoff.
    fn delay(&self, attempt: u32, err: &Error) -> Duration {
        let backoff = self.backoff(attempt);
        match error::retry_after(err) {
            Some(wait) => backoff.max(wait),
            None => backoff,
        }
    }
}

/// Retries temporary gateway failures; exhausted errors become persistent
pub struct Retrying<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: Gateway> Retrying<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<G: Gateway> Gateway for Retrying<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.inner.send(messages.clone()).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt, &err);
                    tracing::warn!(
                        gateway = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "gateway call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(err.persist().with_context("attempts", attempt.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
