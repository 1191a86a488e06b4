//! confab-core - one request format for several LLM vendors
//!
//! This crate provides:
//! - A provider-agnostic chat turn model ([`ChatTurn`], [`ContentBlock`])
//! - Normalization of system turns according to a per-backend [`SystemPolicy`]
//! - Converters to the Anthropic and Gemini request shapes
//! - Adapters for OpenAI, OpenAI-compatible servers, Anthropic and Gemini that all
//!   return a plain completion string through [`CompletionProvider`]

pub mod error;
pub mod messages;
pub mod normalize;
pub mod providers;

pub use error::{CompletionError, ConfigurationError, TransportError, ValidationError};
pub use messages::{ChatContent, ChatRole, ChatTurn, ContentBlock};
pub use normalize::{NormalizedConversation, SystemPolicy, normalize};
pub use providers::{
    AnthropicConfig, AnthropicProvider, CompletionOptions, CompletionProvider, GoogleConfig,
    GoogleProvider, OpenAiCompatConfig, OpenAiCompatProvider, OpenAiConfig, OpenAiProvider,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_exports_cover_the_normalize_path() {
        let turns: Vec<ChatTurn> = serde_json::from_str(
            r#"[{"role": "system", "content": "S"}, {"role": "user", "content": "q"}]"#,
        )
        .unwrap();
        let conv: NormalizedConversation =
            normalize(&turns, SystemPolicy::merge_into_user(false)).unwrap();
        assert_eq!(conv.turns()[0].role, ChatRole::User);
        assert_eq!(conv.turns()[0].content, ChatContent::from("S\nq"));

        let err: CompletionError = normalize(&[], SystemPolicy::DROP).unwrap_err();
        assert!(matches!(
            err,
            CompletionError::Validation(ValidationError::EmptyConversation(_))
        ));
        assert!(ContentBlock::text("x").as_text().is_some());
    }

    #[test]
    fn test_providers_are_object_safe_and_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Box<dyn CompletionProvider>>();

        let providers: Vec<Box<dyn CompletionProvider>> = vec![
            Box::new(OpenAiProvider::new(OpenAiConfig::new("sk-a")).unwrap()),
            Box::new(OpenAiCompatProvider::new(OpenAiCompatConfig::default()).unwrap()),
            Box::new(AnthropicProvider::new(AnthropicConfig::new("sk-ant-b")).unwrap()),
        ];
        let names: Vec<&str> = providers.iter().map(|p| p.provider_name()).collect();
        assert_eq!(names, ["openai", "local", "anthropic"]);
    }
}
