//! System-turn policy and conversation normalization
//!
//! Vendors disagree on where system instructions may live. OpenAI takes them inline,
//! Anthropic and Gemini want a separate channel, and many local backends reject them
//! outright. [`normalize`] applies one explicit [`SystemPolicy`] to a raw turn list and
//! yields a [`NormalizedConversation`] that every converter can rely on:
//!
//! - at most one system turn, always first
//! - every other turn is `user` or `assistant`, in caller order
//! - never empty
//!
//! Merged system text is joined to the user text with a single `"\n"`. Several system
//! turns are first joined to each other the same way. A user turn that already opens
//! with `"{system}\n"` is not merged into again, so normalizing twice is a no-op.

use tracing::debug;

use crate::error::CompletionError;
use crate::messages::{ChatContent, ChatRole, ChatTurn};

/// How system turns are treated for a given backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemPolicy {
    /// Keep system turns (collapsed into one). Ignored when merging.
    pub allow_system: bool,
    /// Prepend system text to the first user turn after the first system turn
    pub merge_system_into_user: bool,
    /// When merging, also retain a system turn
    pub keep_system: bool,
}

impl SystemPolicy {
    /// One leading system turn, sent inline (OpenAI)
    pub const KEEP: Self = Self {
        allow_system: true,
        merge_system_into_user: false,
        keep_system: false,
    };

    /// One leading system turn for a converter to lift into a separate channel
    /// (Anthropic `system`, Gemini `systemInstruction`)
    pub const EXTRACT: Self = Self::KEEP;

    /// Discard system turns
    pub const DROP: Self = Self {
        allow_system: false,
        merge_system_into_user: false,
        keep_system: false,
    };

    /// Fold system text into the conversation's user text
    pub const fn merge_into_user(keep_system: bool) -> Self {
        Self {
            allow_system: false,
            merge_system_into_user: true,
            keep_system,
        }
    }
}

/// Turn list that satisfies the invariants in the module docs
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedConversation {
    turns: Vec<ChatTurn>,
}

impl NormalizedConversation {
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<ChatTurn> {
        self.turns
    }

    /// The system turn, if one survived normalization
    pub fn system(&self) -> Option<&ChatTurn> {
        self.turns.first().filter(|t| t.role == ChatRole::System)
    }

    /// User and assistant turns in order
    pub fn dialogue(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter().filter(|t| t.role != ChatRole::System)
    }

    pub fn has_dialogue(&self) -> bool {
        self.dialogue().next().is_some()
    }
}

/// Apply `policy` to `turns`
///
/// Fails with `EmptyConversation` when nothing is left. Adjacent turns with the same
/// role are left alone.
pub fn normalize(
    turns: &[ChatTurn],
    policy: SystemPolicy,
) -> Result<NormalizedConversation, CompletionError> {
    let is_system = |t: &&ChatTurn| t.role == ChatRole::System;
    let systems: Vec<&ChatTurn> = turns.iter().filter(is_system).collect();
    let mut out: Vec<ChatTurn> = turns
        .iter()
        .filter(|t| t.role != ChatRole::System)
        .cloned()
        .collect();

    if let Some(first_system) = turns.iter().position(|t| t.role == ChatRole::System) {
        let system_text = systems
            .iter()
            .map(|t| t.content.text())
            .collect::<Vec<_>>()
            .join("\n");

        if policy.merge_system_into_user {
            // Index in `out` of the first turn that came after the first system turn
            let offset = turns[..first_system]
                .iter()
                .filter(|t| t.role != ChatRole::System)
                .count();

            match out[offset..].iter().position(|t| t.role == ChatRole::User) {
                Some(idx) => {
                    let target = &mut out[offset + idx];
                    // A retained system turn still carries the text, so a user turn equal to
                    // it is the synthesized turn from an earlier pass
                    let merged = target
                        .content
                        .is_merged_with(&system_text, policy.keep_system);
                    if !system_text.is_empty() && !merged {
                        let content = std::mem::replace(
                            &mut target.content,
                            ChatContent::Text(String::new()),
                        );
                        target.content = content.prepend_text(&system_text);
                    }
                }
                None => out.insert(0, ChatTurn::user(system_text.clone())),
            }

            if policy.keep_system {
                out.insert(0, ChatTurn::system(system_text));
            }
        } else if policy.allow_system {
            // A single system turn keeps its blocks; several collapse to text
            let content = match systems.as_slice() {
                [only] => only.content.clone(),
                _ => ChatContent::Text(system_text),
            };
            out.insert(0, ChatTurn::new(ChatRole::System, content));
        }

        debug!(
            "Normalized {} system turn(s) with policy {:?}",
            systems.len(),
            policy
        );
    }

    if out.is_empty() {
        return Err(CompletionError::empty_conversation(
            "no turns remain after applying the system policy",
        ));
    }

    Ok(NormalizedConversation { turns: out })
}
