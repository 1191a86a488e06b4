//! The adapter contract shared by every vendor

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{CompletionError, ValidationError};
use crate::messages::ChatTurn;

/// Extra request fields passed through to the vendor call
///
/// Caller keys win over the adapter's own on collision.
pub type CompletionOptions = Map<String, Value>;

/// Trait that all completion adapters implement
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic", "ollama")
    fn provider_name(&self) -> &str;

    /// Model identifier sent with every request
    fn model(&self) -> &str;

    /// Normalize `turns` and assemble the JSON body `complete` would send
    ///
    /// Validation errors surface here, before any network call.
    fn build_request(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<Value, CompletionError>;

    /// Normalize `turns`, call the vendor once and return the completion text
    async fn complete(
        &self,
        turns: &[ChatTurn],
        max_output_tokens: u32,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

pub(crate) fn check_max_tokens(max_output_tokens: u32) -> Result<(), CompletionError> {
    if max_output_tokens == 0 {
        return Err(ValidationError::InvalidMaxTokens.into());
    }
    Ok(())
}
