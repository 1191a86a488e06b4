//! Error taxonomy for completion calls
//!
//! Validation and configuration errors are raised by this crate with an actionable
//! message. Transport errors wrap whatever the HTTP layer or the vendor returned and
//! are never reinterpreted.

use thiserror::Error;

/// Top-level error returned by adapter construction and [`complete`](crate::CompletionProvider::complete)
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{provider} returned an unusable response: {detail}")]
    MalformedResponse { provider: String, detail: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The request was rejected before any network call
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("empty conversation: {0}")]
    EmptyConversation(String),

    #[error("unknown role '{0}' (expected one of: system, user, assistant)")]
    UnknownRole(String),

    #[error("max_output_tokens must be greater than zero")]
    InvalidMaxTokens,
}

/// The adapter cannot be constructed in a usable state
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing {provider} API key. Set {env_var} or pass api_key explicitly")]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("{provider} support is not available in this build. Rebuild with `--features {feature}`")]
    MissingDependency {
        provider: &'static str,
        feature: &'static str,
    },

    #[error("invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure of the vendor call itself, passed through unchanged
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{provider} API request failed with status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
}

impl CompletionError {
    /// Shorthand for the most common validation failure
    pub fn empty_conversation(detail: impl Into<String>) -> Self {
        Self::Validation(ValidationError::EmptyConversation(detail.into()))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
