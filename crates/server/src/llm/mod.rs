mod openai;
pub mod schema;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use decant_common::config::LlmConfig;
use decant_common::DecantError;

use crate::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerRegistry};
use crate::retry::{with_retry, RetryPolicy};

/// Role of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Per-call overrides. Unset fields fall back to the client defaults
/// (temperature 0.3, max_tokens 2000).
#[derive(Clone, Copy, Debug, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Plain chat completion result.
#[derive(Clone, Debug)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Schema-validated JSON completion result.
#[derive(Clone, Debug)]
pub struct StructuredCompletion {
    pub value: Value,
    pub raw: String,
    pub usage: TokenUsage,
}

/// Object-safe provider seam. Tests supply mock implementations;
/// production uses [`LlmClient`].
pub trait LlmCaller: Send + Sync {
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, DecantError>> + Send + 'a>>;

    fn complete_with_schema<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        json_schema: &'a Value,
        opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<StructuredCompletion, DecantError>> + Send + 'a>>;
}

/// OpenAI-compatible chat client wrapped in the RATE_LIMIT retry preset
/// and a per-provider circuit breaker — retry wraps the breaker, so an
/// open circuit ends the retry loop on its first attempt.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    defaults: LlmConfig,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl LlmClient {
    /// Returns None when no API key is configured; callers degrade to
    /// fallback classification.
    pub fn new(
        api_key: Option<String>,
        base_url: String,
        model: String,
        defaults: LlmConfig,
        breakers: &CircuitBreakerRegistry,
    ) -> Option<Self> {
        let api_key = match api_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!("OPENAI_API_KEY not set — LLM client disabled");
                return None;
            }
        };

        Some(Self {
            http: reqwest::Client::new(),
            base_url,
            model,
            api_key,
            defaults,
            breaker: breakers.get_or_create_with("llm_openai", BreakerConfig::standard),
            retry: RetryPolicy::rate_limit(),
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        opts: ChatOptions,
        json_mode: bool,
    ) -> Result<Completion, DecantError> {
        let temperature = opts.temperature.unwrap_or(self.defaults.temperature);
        let max_tokens = opts.max_tokens.unwrap_or(self.defaults.max_tokens);

        with_retry(&self.retry, "llm", || {
            self.breaker.call(|| {
                openai::send_chat_completion(
                    &self.http,
                    &self.base_url,
                    &self.api_key,
                    &self.model,
                    messages,
                    temperature,
                    max_tokens,
                    json_mode,
                )
            })
        })
        .await
    }
}

impl LlmCaller for LlmClient {
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, DecantError>> + Send + 'a>> {
        Box::pin(async move {
            let completion = self.send(messages, opts, false).await?;
            if completion.content.trim().is_empty() {
                return Err(DecantError::LlmEmptyResponse);
            }
            Ok(completion)
        })
    }

    fn complete_with_schema<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        json_schema: &'a Value,
        opts: ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<StructuredCompletion, DecantError>> + Send + 'a>> {
        Box::pin(async move {
            let completion = self.send(messages, opts, true).await?;
            if completion.content.trim().is_empty() {
                return Err(DecantError::LlmEmptyResponse);
            }

            let value: Value = serde_json::from_str(&completion.content)
                .map_err(|e| DecantError::LlmParse(e.to_string()))?;

            schema::validate(&value, json_schema).map_err(DecantError::LlmSchema)?;

            Ok(StructuredCompletion {
                value,
                raw: completion.content,
                usage: completion.usage,
            })
        })
    }
}
