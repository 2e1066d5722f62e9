// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Conversation and wire types.
//
// `ChatTurn` is one user/assistant message in the conversation the UI
// sends. `StreamEvent` is the relay's own event-stream wire format.
// Inbound request bodies are loosely shaped JSON and are normalized
// defensively: turns with an unexpected role or a non-string text are
// dropped rather than rejected.

use serde::{Deserialize, Serialize};

/// Only the last this-many turns are forwarded upstream, to bound the
/// payload size of long conversations.
pub const MAX_HISTORY_TURNS: usize = 20;

/// The role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in the conversation. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    /// OpenAI-style role string for the upstream request payload.
    pub fn role_str(&self) -> &'static str {
        match self.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Normalize a loose `messages` value into forwardable turns.
///
/// Non-array input yields an empty conversation. Entries that are not
/// objects, carry a role other than user/assistant, or whose `text` is
/// not a string are silently dropped. The result is capped to the last
/// [`MAX_HISTORY_TURNS`] turns, order preserved.
pub fn recent_turns(messages: &serde_json::Value) -> Vec<ChatTurn> {
    let Some(entries) = messages.as_array() else {
        return Vec::new();
    };

    let mut turns: Vec<ChatTurn> = entries
        .iter()
        .filter_map(|entry| {
            let role = match entry.get("role").and_then(|r| r.as_str()) {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                _ => return None,
            };
            let text = entry.get("text")?.as_str()?;
            Some(ChatTurn::new(role, text))
        })
        .collect();

    if turns.len() > MAX_HISTORY_TURNS {
        turns.drain(..turns.len() - MAX_HISTORY_TURNS);
    }
    turns
}

/// Token accounting reported by the upstream provider.
///
/// Wire names are camelCase on the relay's own surface. A usage block
/// is only considered valid when all three counters were finite numbers
/// and the total was positive; [`Usage::from_loose`] enforces that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Extract a usage block from a loosely shaped upstream payload
    /// (OpenAI-style snake_case field names).
    ///
    /// Returns `None` — usage absent, not zero — unless all three
    /// counters are finite, non-negative numbers and the total is
    /// positive.
    pub fn from_loose(value: &serde_json::Value) -> Option<Usage> {
        let counter = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_f64())
                .filter(|v| v.is_finite() && *v >= 0.0)
        };

        let prompt = counter("prompt_tokens")?;
        let completion = counter("completion_tokens")?;
        let total = counter("total_tokens")?;
        if total <= 0.0 {
            return None;
        }

        Some(Usage {
            prompt_tokens: prompt as u64,
            completion_tokens: completion as u64,
            total_tokens: total as u64,
        })
    }
}

/// One frame of the relay's event-stream wire format.
///
/// Exactly one `done` or terminal `error` is emitted per stream;
/// `usage` is emitted at most once, always before `done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk { text: String },
    Usage { usage: Usage },
    Done,
    Error { error: String },
}

/// Final result of a chat call: full text plus usage if upstream
/// supplied a valid block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}
