//! Google Gemini adapter
//!
//! Gemini support sits behind the `gemini` cargo feature (on by default). A build
//! without it still exposes the types, but construction reports the missing
//! capability instead of failing later at call time.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

use crate::error::{CompletionError, ConfigurationError};
use crate::messages::{ChatRole, ChatTurn, ContentBlock};
use crate::normalize::{NormalizedConversation, SystemPolicy, normalize};

use super::http::{self, DEFAULT_TIMEOUT};
use super::types::{CompletionOptions, CompletionProvider, check_max_tokens};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Construction-time settings for [`GoogleProvider`]
#[derive(Clone)]
pub struct GoogleConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GoogleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read the key from `GEMINI_API_KEY`; an unset variable yields an empty key
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

/// Google Gemini provider
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GoogleProvider {
    /// Build the adapter
    ///
    /// Fails with `MissingDependency` when compiled without the `gemini` feature,
    /// then with `MissingCredential` when the key is empty.
    pub fn new(config: GoogleConfig) -> Result<Self, CompletionError> {
        if !cfg!(feature = "gemini") {
            return Err(ConfigurationError::MissingDependency {
                provider: "Gemini",
                feature: "gemini",
            }
            .into());
        }
        if config.api_key.trim().is_empty() {
            return Err(ConfigurationError::MissingCredential {
                provider: "Gemini",
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
impl CompletionProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Normalize, convert to role/parts and assemble the request body
    ///
    /// Caller options land in `generationConfig`.
    fn build_request(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<Value, CompletionError> {
        check_max_tokens(max_output_tokens)?;

        let conversation = normalize(turns, SystemPolicy::EXTRACT)?;
        let (system_instruction, contents) = to_gemini(&conversation);
        if contents.is_empty() {
            return Err(CompletionError::empty_conversation(
                "no text-bearing user or assistant turns remain for gemini",
            ));
        }

        debug!(
            "Gemini request: model={}, contents={}, system_instruction={}",
            self.model,
            contents.len(),
            system_instruction.is_some()
        );

        let mut generation_config = Map::new();
        generation_config.insert("maxOutputTokens".to_string(), Value::from(max_output_tokens));
        http::merge_options(&mut generation_config, options);

        let mut body = Map::new();
        body.insert("contents".to_string(), serde_json::to_value(&contents)?);
        if let Some(instruction) = system_instruction {
            body.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": instruction}]}),
            );
        }
        body.insert("generationConfig".to_string(), Value::Object(generation_config));

        Ok(Value::Object(body))
    }

    async fn complete(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let body = self.build_request(turns, max_output_tokens, options)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body);

        let api_response: GeminiApiResponse = http::send_json(request, "Gemini").await?;

        debug!(
            "Gemini response: candidates={}, text_field={}",
            api_response.candidates.len(),
            api_response.text.is_some()
        );

        Ok(extract_text(api_response))
    }
}

/// Convert a normalized conversation to a system instruction plus `contents`
///
/// Only text blocks become parts. A turn with no text blocks left is omitted.
pub fn to_gemini(conversation: &NormalizedConversation) -> (Option<String>, Vec<GeminiContent>) {
    let system_instruction = conversation.system().map(|t| t.content.text());

    let contents = conversation
        .dialogue()
        .filter_map(|turn| {
            let role = match turn.role {
                ChatRole::Assistant => "model",
                _ => "user",
            };
            let parts: Vec<GeminiPart> = turn
                .content
                .blocks()
                .into_iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(GeminiPart { text: Some(text) }),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                debug!("Dropping {} turn without text parts", turn.role);
                return None;
            }
            Some(GeminiContent {
                role: role.to_string(),
                parts,
            })
        })
        .collect();

    (system_instruction, contents)
}

/// The top-level `text` field when present, otherwise every candidate's text parts
/// joined by newline
fn extract_text(resp: GeminiApiResponse) -> String {
    if let Some(text) = resp.text.filter(|t| !t.is_empty()) {
        return text;
    }

    resp.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text.filter(|t| !t.is_empty()))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Gemini wire types ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A part; only the text field matters here, anything else is ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value) -> GeminiApiResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_to_gemini_maps_roles_in_order() {
        let turns = vec![
            ChatTurn::user("a"),
            ChatTurn::assistant("b"),
            ChatTurn::user("c"),
            ChatTurn::assistant("d"),
        ];
        let conv = normalize(&turns, SystemPolicy::EXTRACT).unwrap();
        let (system, contents) = to_gemini(&conv);
        assert!(system.is_none());
        let roles: Vec<&str> = contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, ["user", "model", "user", "model"]);
        let texts: Vec<&str> = contents
            .iter()
            .map(|c| c.parts[0].text.as_deref().unwrap())
            .collect();
        assert_eq!(texts, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_to_gemini_extracts_system_instruction() {
        let turns = vec![
            ChatTurn::system(vec![
                ContentBlock::text("rule one"),
                ContentBlock::Unsupported,
                ContentBlock::text("rule two"),
            ]),
            ChatTurn::user("Hi"),
        ];
        let conv = normalize(&turns, SystemPolicy::EXTRACT).unwrap();
        let (system, contents) = to_gemini(&conv);
        assert_eq!(system.as_deref(), Some("rule one\nrule two"));
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, "user");
    }

    #[test]
    fn test_to_gemini_drops_non_text_blocks_and_empty_turns() {
        let image = ContentBlock::Image {
            media_type: "image/png".to_string(),
            data: "AAAA".to_string(),
        };
        let turns = vec![
            ChatTurn::user(vec![image.clone(), ContentBlock::text("caption")]),
            ChatTurn::assistant(vec![image]),
            ChatTurn::user("next"),
        ];
        let conv = normalize(&turns, SystemPolicy::EXTRACT).unwrap();
        let (_, contents) = to_gemini(&conv);
        assert_eq!(contents.len(), 2);
        assert_eq!(
            contents[0].parts,
            vec![GeminiPart {
                text: Some("caption".to_string())
            }]
        );
        assert_eq!(contents[1].role, "user");
    }

    #[test]
    fn test_extract_text_prefers_top_level_field() {
        let resp = parse(json!({
            "text": "direct",
            "candidates": [{"content": {"parts": [{"text": "ignored"}]}}]
        }));
        assert_eq!(extract_text(resp), "direct");
    }

    #[test]
    fn test_extract_text_joins_parts_with_newline() {
        let resp = parse(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "a"}, {"text": "b"}]}}]
        }));
        assert_eq!(extract_text(resp), "a\nb");
    }

    #[test]
    fn test_extract_text_spans_candidates_and_skips_non_text() {
        let resp = parse(json!({
            "text": "",
            "candidates": [
                {"content": {"parts": [{"text": "a"}, {"functionCall": {"name": "f", "args": {}}}]}},
                {"finishReason": "SAFETY"},
                {"content": {"parts": [{"text": ""}, {"text": "b"}]}}
            ]
        }));
        assert_eq!(extract_text(resp), "a\nb");
    }

    #[test]
    fn test_extract_text_no_candidates_is_empty() {
        assert_eq!(extract_text(parse(json!({}))), "");
    }

    #[cfg(feature = "gemini")]
    mod enabled {
        use super::*;
        use wiremock::matchers::{body_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[test]
        fn test_missing_api_key_rejected() {
            let err = GoogleProvider::new(GoogleConfig::new("")).unwrap_err();
            assert!(matches!(
                err,
                CompletionError::Configuration(ConfigurationError::MissingCredential {
                    env_var: API_KEY_ENV_VAR,
                    ..
                })
            ));
        }

        #[test]
        fn test_google_provider_debug_hides_key() {
            let provider = GoogleProvider::new(GoogleConfig::new("AIza-secret")).unwrap();
            let debug = format!("{:?}", provider);
            assert!(!debug.contains("AIza-secret"));
        }

        #[test]
        fn test_build_request_options_go_to_generation_config() {
            let provider = GoogleProvider::new(GoogleConfig::new("AIza-x")).unwrap();
            let options = json!({"temperature": 0.3, "maxOutputTokens": 5})
                .as_object()
                .cloned()
                .unwrap();
            let body = provider
                .build_request(&[ChatTurn::user("Hi")], 100, &options)
                .unwrap();
            assert_eq!(
                body["generationConfig"],
                json!({"maxOutputTokens": 5, "temperature": 0.3})
            );
            assert!(body.get("systemInstruction").is_none());
        }

        #[test]
        fn test_build_request_image_only_is_empty() {
            let provider = GoogleProvider::new(GoogleConfig::new("AIza-x")).unwrap();
            let turns = [ChatTurn::user(vec![ContentBlock::Image {
                media_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }])];
            let err = provider
                .build_request(&turns, 100, &CompletionOptions::new())
                .unwrap_err();
            assert!(err.is_validation());
        }

        #[tokio::test]
        async fn test_complete_generate_content() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/models/gemini-2.5-flash:generateContent"))
                .and(header("x-goog-api-key", "AIza-test"))
                .and(body_json(json!({
                    "contents": [
                        {"role": "user", "parts": [{"text": "Hi"}]},
                        {"role": "model", "parts": [{"text": "Hello"}]},
                        {"role": "user", "parts": [{"text": "Again"}]}
                    ],
                    "systemInstruction": {"parts": [{"text": "Be terse."}]},
                    "generationConfig": {"maxOutputTokens": 40}
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "a"}, {"text": "b"}]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
                })))
                .expect(1)
                .mount(&server)
                .await;

            let provider =
                GoogleProvider::new(GoogleConfig::new("AIza-test").with_base_url(server.uri()))
                    .unwrap();
            let text = provider
                .complete(
                    &[
                        ChatTurn::system("Be terse."),
                        ChatTurn::user("Hi"),
                        ChatTurn::assistant("Hello"),
                        ChatTurn::user("Again"),
                    ],
                    40,
                    &CompletionOptions::new(),
                )
                .await
                .unwrap();
            assert_eq!(text, "a\nb");
        }
    }

    #[cfg(not(feature = "gemini"))]
    #[test]
    fn test_missing_feature_reported_before_credentials() {
        let err = GoogleProvider::new(GoogleConfig::new("")).unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Configuration(ConfigurationError::MissingDependency { .. })
        ));
    }
}
