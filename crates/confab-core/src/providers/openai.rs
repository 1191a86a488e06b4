//! OpenAI chat completions adapter (GPT-4o, o3, and compatible proxies)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CompletionError, ConfigurationError};
use crate::messages::{ChatContent, ChatTurn, ContentBlock};
use crate::normalize::{NormalizedConversation, SystemPolicy, normalize};

use super::http::{self, DEFAULT_TIMEOUT};
use super::types::{CompletionOptions, CompletionProvider, check_max_tokens};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Construction-time settings for [`OpenAiProvider`]
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    /// Endpoint root including the version segment, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub organization: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read the key from `OPENAI_API_KEY`; an unset variable yields an empty key
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

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI provider
///
/// Every request carries this instance's key, organization and base URL, so several
/// instances pointing at different endpoints can be used side by side.
pub struct OpenAiProvider {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    organization: Option<String>,
    policy: SystemPolicy,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("organization", &self.organization)
            .field("policy", &self.policy)
            .finish()
    }
}

impl OpenAiProvider {
    /// Build the adapter; fails if the API key is empty
    pub fn new(config: OpenAiConfig) -> Result<Self, CompletionError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigurationError::MissingCredential {
                provider: "OpenAI",
                env_var: API_KEY_ENV_VAR,
            }
            .into());
        }
        Self::connect("openai", config)
    }

    /// Build without requiring a key, for self-hosted compatible servers
    pub(crate) fn connect(name: &str, config: OpenAiConfig) -> Result<Self, CompletionError> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            name: name.to_string(),
            api_key: config.api_key,
            base_url: http::parse_base_url(&config.base_url)?,
            model: config.model,
            organization: config.organization.filter(|o| !o.is_empty()),
            policy: SystemPolicy::KEEP,
        })
    }

    /// Replace the system policy (defaults to keeping system turns inline)
    pub fn with_system_policy(mut self, policy: SystemPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn system_policy(&self) -> SystemPolicy {
        self.policy
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Normalize and assemble the request body without sending it
    fn build_request(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<Value, CompletionError> {
        check_max_tokens(max_output_tokens)?;

        let conversation = normalize(turns, self.policy)?;
        if !conversation.has_dialogue() {
            return Err(CompletionError::empty_conversation(format!(
                "no user or assistant turns remain for {}",
                self.name
            )));
        }

        let messages = to_openai_messages(&conversation);
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert("messages".to_string(), serde_json::to_value(&messages)?);
        body.insert("max_tokens".to_string(), Value::from(max_output_tokens));
        http::merge_options(&mut body, options);

        debug!(
            "{} request: model={}, messages={}",
            self.name,
            self.model,
            messages.len()
        );

        Ok(Value::Object(body))
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let body = self.build_request(turns, max_output_tokens, options)?;
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let api_response: OpenAiApiResponse = http::send_json(request, &self.name).await?;

        debug!(
            "{} response: choices={}, finish_reason={:?}",
            self.name,
            api_response.choices.len(),
            api_response.choices.first().and_then(|c| c.finish_reason.as_deref())
        );

        extract_text(api_response, &self.name)
    }
}

/// Convert a normalized conversation to the flat OpenAI message list
///
/// System turns stay inline. Text content is sent as a plain string; block content
/// becomes typed parts, with unsupported blocks reduced to empty text.
pub fn to_openai_messages(conversation: &NormalizedConversation) -> Vec<OpenAiMessage> {
    conversation
        .turns()
        .iter()
        .map(|turn| OpenAiMessage {
            role: turn.role.as_str().to_string(),
            content: match &turn.content {
                ChatContent::Text(text) => OpenAiContent::Text(text.clone()),
                ChatContent::Blocks(blocks) if blocks.is_empty() => {
                    OpenAiContent::Text(String::new())
                }
                ChatContent::Blocks(blocks) => {
                    OpenAiContent::Parts(blocks.iter().map(to_openai_part).collect())
                }
            },
        })
        .collect()
}

fn to_openai_part(block: &ContentBlock) -> OpenAiPart {
    match block {
        ContentBlock::Text { text } => OpenAiPart::Text { text: text.clone() },
        ContentBlock::Image { media_type, data } => OpenAiPart::ImageUrl {
            image_url: OpenAiImageUrl {
                url: format!("data:{media_type};base64,{data}"),
            },
        },
        ContentBlock::Unsupported => OpenAiPart::Text {
            text: String::new(),
        },
    }
}

/// First choice's message content, verbatim
fn extract_text(resp: OpenAiApiResponse, provider: &str) -> Result<String, CompletionError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::MalformedResponse {
            provider: provider.to_string(),
            detail: "response had no choices".to_string(),
        })?;
    Ok(choice.message.content.unwrap_or_default())
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: OpenAiContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChatRole;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiConfig::new("sk-secret-key").with_base_url(base_url)).unwrap()
    }

    fn completion_body(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        })
    }

    #[test]
    fn test_to_openai_messages_keeps_system_inline() {
        let turns = vec![ChatTurn::system("Be terse."), ChatTurn::user("Hi")];
        let conv = normalize(&turns, SystemPolicy::KEEP).unwrap();
        let result = to_openai_messages(&conv);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!([
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"}
            ])
        );
    }

    #[test]
    fn test_to_openai_messages_blocks_become_parts() {
        let turns = vec![ChatTurn::new(
            ChatRole::User,
            vec![
                ContentBlock::text("what is this?"),
                ContentBlock::Image {
                    media_type: "image/png".to_string(),
                    data: "iVBOR".to_string(),
                },
                ContentBlock::Unsupported,
            ],
        )];
        let conv = normalize(&turns, SystemPolicy::KEEP).unwrap();
        let result = to_openai_messages(&conv);
        assert_eq!(
            serde_json::to_value(&result[0].content).unwrap(),
            json!([
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBOR"}},
                {"type": "text", "text": ""}
            ])
        );
    }

    #[test]
    fn test_to_openai_messages_empty_blocks_become_empty_text() {
        let conv = normalize(&[ChatTurn::user(Vec::<ContentBlock>::new())], SystemPolicy::KEEP)
            .unwrap();
        let result = to_openai_messages(&conv);
        assert_eq!(result[0].content, OpenAiContent::Text(String::new()));
    }

    #[test]
    fn test_extract_text_first_choice_verbatim() {
        let resp: OpenAiApiResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"content": "  first\n"}},
                {"message": {"content": "second"}}
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(resp, "openai").unwrap(), "  first\n");
    }

    #[test]
    fn test_extract_text_null_content_is_empty() {
        let resp: OpenAiApiResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": null}}]})).unwrap();
        assert_eq!(extract_text(resp, "openai").unwrap(), "");
    }

    #[test]
    fn test_extract_text_no_choices() {
        let resp: OpenAiApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let err = extract_text(resp, "openai").unwrap_err();
        assert!(matches!(err, CompletionError::MalformedResponse { .. }));
    }

    #[test]
    fn test_missing_api_key_rejected_at_construction() {
        let err = OpenAiProvider::new(OpenAiConfig::new("")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains(API_KEY_ENV_VAR));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err =
            OpenAiProvider::new(OpenAiConfig::new("sk-x").with_base_url("::nope")).unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Configuration(ConfigurationError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_build_request_caller_options_win() {
        let p = provider("https://api.openai.com/v1");
        let options = json!({"max_tokens": 7, "temperature": 0.5})
            .as_object()
            .cloned()
            .unwrap();
        let body = p
            .build_request(&[ChatTurn::user("Hi")], 256, &options)
            .unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 7);
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn test_build_request_rejects_system_only() {
        let p = provider("https://api.openai.com/v1");
        let err = p
            .build_request(&[ChatTurn::system("X")], 16, &CompletionOptions::new())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_openai_provider_debug_hides_key() {
        let p = provider("https://api.openai.com/v1");
        let debug = format!("{:?}", p);
        assert!(!debug.contains("sk-secret-key"));
        let debug = format!("{:?}", OpenAiConfig::new("sk-secret-key"));
        assert!(!debug.contains("sk-secret-key"));
    }

    #[tokio::test]
    async fn test_complete_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-secret-key"))
            .and(header("OpenAI-Organization", "org-42"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 64,
                "messages": [
                    {"role": "system", "content": "Be terse."},
                    {"role": "user", "content": "Hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello.")))
            .expect(1)
            .mount(&server)
            .await;

        let p = OpenAiProvider::new(
            OpenAiConfig::new("sk-secret-key")
                .with_base_url(format!("{}/v1", server.uri()))
                .with_model("gpt-4o-mini")
                .with_organization("org-42"),
        )
        .unwrap();
        let text = p
            .complete(
                &[ChatTurn::system("Be terse."), ChatTurn::user("Hi")],
                64,
                &CompletionOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "Hello.");
    }

    #[tokio::test]
    async fn test_complete_propagates_vendor_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":{"message":"bad key"}}"#),
            )
            .mount(&server)
            .await;

        let p = provider(&format!("{}/v1", server.uri()));
        let err = p
            .complete(&[ChatTurn::user("Hi")], 16, &CompletionOptions::new())
            .await
            .unwrap_err();
        match err {
            CompletionError::Transport(crate::error::TransportError::Status {
                status, body, ..
            }) => {
                assert_eq!(status, 401);
                assert_eq!(body, r#"{"error":{"message":"bad key"}}"#);
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_conversation_never_hits_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("x")))
            .expect(0)
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let err = p
            .complete(&[], 16, &CompletionOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
