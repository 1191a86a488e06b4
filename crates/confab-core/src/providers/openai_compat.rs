//! OpenAI-compatible adapter for Ollama, vLLM, LM Studio, etc.
//!
//! Reuses the OpenAI wire format with a configurable base URL. Many local models
//! (Gemma and friends) reject system turns, so system text is folded into the next
//! user turn by default.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CompletionError;
use crate::messages::ChatTurn;
use crate::normalize::SystemPolicy;

use super::http::DEFAULT_TIMEOUT;
use super::openai::{OpenAiConfig, OpenAiProvider};
use super::types::{CompletionOptions, CompletionProvider};

pub const DEFAULT_NAME: &str = "local";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_API_KEY: &str = "dummy";

/// Construction-time settings for [`OpenAiCompatProvider`]
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    /// Human-readable label (e.g. "ollama", "vllm")
    pub name: String,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Whether the backend accepts system turns. When true a system turn is sent in
    /// addition to the merged user text.
    pub allow_system: bool,
    pub timeout: Duration,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            allow_system: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for OpenAiCompatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatConfig")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("allow_system", &self.allow_system)
            .finish()
    }
}

/// OpenAI-compatible provider: wraps [`OpenAiProvider`] with a merge-into-user policy
pub struct OpenAiCompatProvider {
    inner: OpenAiProvider,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("inner", &self.inner)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider. The API key may be empty.
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, CompletionError> {
        let policy = SystemPolicy::merge_into_user(config.allow_system);
        let inner = OpenAiProvider::connect(
            &config.name,
            OpenAiConfig::new(config.api_key)
                .with_model(config.model)
                .with_base_url(config.base_url)
                .with_timeout(config.timeout),
        )?
        .with_system_policy(policy);

        Ok(Self { inner })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn build_request(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<serde_json::Value, CompletionError> {
        self.inner.build_request(turns, max_output_tokens, options)
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self.inner.complete(turns, max_output_tokens, options).await
    }
}
