//! Anthropic Claude adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CompletionError, ConfigurationError};
use crate::messages::{ChatContent, ChatRole, ChatTurn, ContentBlock};
use crate::normalize::{NormalizedConversation, SystemPolicy, normalize};

use super::http::{self, DEFAULT_TIMEOUT};
use super::types::{CompletionOptions, CompletionProvider, check_max_tokens};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

/// Construction-time settings for [`AnthropicProvider`]
#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(API_KEY_ENV_VAR).unwrap_or_default())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, CompletionError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigurationError::MissingCredential {
                provider: "Anthropic",
                env_var: API_KEY_ENV_VAR,
            }
            .into());
        }

        Ok(Self {
            client: http::build_client(config.timeout)?,
            api_key: config.api_key,
            base_url: http::parse_base_url(&config.base_url)?,
            model: config.model,
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Normalize, split out the system channel and assemble the request body
    fn build_request(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<Value, CompletionError> {
        check_max_tokens(max_output_tokens)?;

        let conversation = normalize(turns, SystemPolicy::EXTRACT)?;
        let (system, history) = to_anthropic(&conversation);
        if history.is_empty() {
            return Err(CompletionError::empty_conversation(
                "no user or assistant turns remain for anthropic",
            ));
        }

        debug!(
            "Anthropic request: model={}, messages={}, system={}",
            self.model,
            history.len(),
            system.is_some()
        );

        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));
        if let Some(system) = system {
            body.insert("system".to_string(), serde_json::to_value(system)?);
        }
        body.insert("messages".to_string(), serde_json::to_value(history)?);
        body.insert("max_tokens".to_string(), Value::from(max_output_tokens));
        http::merge_options(&mut body, options);

        Ok(Value::Object(body))
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let body = self.build_request(turns, max_output_tokens, options)?;
        let url = format!("{}/v1/messages", self.base_url);

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let api_response: AnthropicApiResponse = http::send_json(request, "Anthropic").await?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Ok(extract_text(&api_response))
    }
}

/// Split a normalized conversation into Anthropic's system channel and history
///
/// Returns `None` for the system part when the conversation had no system turn.
/// Every dialogue turn yields exactly one history entry with at least one block.
pub fn to_anthropic(
    conversation: &NormalizedConversation,
) -> (Option<Vec<AnthropicBlock>>, Vec<AnthropicMessage>) {
    let system = conversation.system().map(|t| to_anthropic_blocks(&t.content));

    let history = conversation
        .dialogue()
        .map(|turn| AnthropicMessage {
            role: match turn.role {
                ChatRole::Assistant => "assistant",
                _ => "user",
            }
            .to_string(),
            content: to_anthropic_blocks(&turn.content),
        })
        .collect();

    (system, history)
}

fn to_anthropic_blocks(content: &ChatContent) -> Vec<AnthropicBlock> {
    let blocks: Vec<AnthropicBlock> = content
        .blocks()
        .into_iter()
        .map(|b| match b {
            ContentBlock::Text { text } => AnthropicBlock::Text { text },
            ContentBlock::Image { media_type, data } => AnthropicBlock::Image {
                source: AnthropicImageSource {
                    kind: "base64".to_string(),
                    media_type,
                    data,
                },
            },
            ContentBlock::Unsupported => AnthropicBlock::Text {
                text: String::new(),
            },
        })
        .collect();

    if blocks.is_empty() {
        vec![AnthropicBlock::Text {
            text: String::new(),
        }]
    } else {
        blocks
    }
}

/// All text blocks concatenated in order, no separator
fn extract_text(resp: &AnthropicApiResponse) -> String {
    resp.content
        .iter()
        .filter_map(|b| match b {
            AnthropicResponseBlock::Text { text } => Some(text.as_str()),
            AnthropicResponseBlock::Other => None,
        })
        .collect()
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<AnthropicBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    #[serde(default)]
    content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
