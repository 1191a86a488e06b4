//! Vendor adapters
//!
//! Supports Anthropic, OpenAI, Google Gemini, and any OpenAI-compatible endpoint.
//! Every adapter implements [`CompletionProvider`] and owns its configuration, so
//! instances are independent of each other.

pub mod anthropic;
pub mod google;
mod http;
pub mod openai;
pub mod openai_compat;
pub mod types;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use google::{GoogleConfig, GoogleProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use types::{CompletionOptions, CompletionProvider};
