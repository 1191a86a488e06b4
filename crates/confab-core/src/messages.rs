//! Provider-agnostic chat turns

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: ChatContent,
}

/// Message role
///
/// Deserializing rejects anything but `system`, `user` and `assistant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Content of a turn: either plain text or structured blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single block within a turn
///
/// Only `Text` is understood by every converter. Blocks with an unknown `type`
/// deserialize to `Unsupported` and degrade to empty text downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Base64-encoded image
    Image {
        media_type: String,
        data: String,
    },
    #[serde(other)]
    Unsupported,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<ChatContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<ChatContent>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<ChatContent>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<ChatContent>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

impl ChatRole {
    pub fn parse(role: &str) -> Result<Self, ValidationError> {
        match role {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for ChatRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChatRole {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChatContent {
    /// Content as a block list; plain text becomes a single text block
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Text-only view: text blocks joined by newline, other blocks skipped
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether the content already has the shape `prepend_text(prefix)` produces
    ///
    /// Text must start with `"{prefix}\n"`; blocks must open with a text block equal to
    /// `prefix` followed by at least one more block. With `bare_ok`, content that is
    /// exactly `prefix` (a lone text block, or plain text) also counts.
    pub fn is_merged_with(&self, prefix: &str, bare_ok: bool) -> bool {
        match self {
            Self::Text(text) => {
                text.strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('\n'))
                    || (bare_ok && text == prefix)
            }
            Self::Blocks(blocks) => match blocks.as_slice() {
                [first, rest @ ..] if first.as_text() == Some(prefix) => {
                    !rest.is_empty() || bare_ok
                }
                _ => false,
            },
        }
    }

    /// Put `prefix` in front of the content, separated by a newline
    ///
    /// Block content gets `prefix` as a new leading text block instead.
    pub fn prepend_text(self, prefix: &str) -> Self {
        match self {
            Self::Text(text) => Self::Text(format!("{prefix}\n{text}")),
            Self::Blocks(blocks) => {
                let mut merged = Vec::with_capacity(blocks.len() + 1);
                merged.push(ContentBlock::Text {
                    text: prefix.to_string(),
                });
                merged.extend(blocks);
                Self::Blocks(merged)
            }
        }
    }
}

impl From<&str> for ChatContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ChatContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentBlock>> for ChatContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}
