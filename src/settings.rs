// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Request settings normalization.
//
// The UI sends a loosely typed settings bag. Normalization is a pure
// function: every field of an unexpected type or shape falls back to a
// hardcoded default, never a rejection. Kept separate from the
// streaming logic so both endpoints share it.

/// Model requested when the settings bag does not name one.
pub const DEFAULT_MODEL: &str = "openai/gpt-4.1-nano";

/// Sampling temperature used when the bag's value is not a finite number.
pub const DEFAULT_TEMPERATURE: f64 = 0.6;

/// Completion budget in concise mode.
pub const MAX_TOKENS_CONCISE: u32 = 220;

/// Completion budget otherwise.
pub const MAX_TOKENS_DEFAULT: u32 = 500;

/// System instruction used when no persona is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Normalized per-request settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    pub model: String,
    pub temperature: f64,
    pub concise_mode: bool,
    pub persona: String,
}

impl RequestSettings {
    /// Normalize a loose settings value into strict settings.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let model = value
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();

        let temperature = value
            .get("temperature")
            .and_then(|t| t.as_f64())
            .filter(|t| t.is_finite())
            .unwrap_or(DEFAULT_TEMPERATURE);

        let concise_mode = value
            .get("conciseMode")
            .and_then(|c| c.as_bool())
            .unwrap_or(false);

        let persona = value
            .get("persona")
            .and_then(|p| p.as_str())
            .unwrap_or("")
            .to_string();

        Self {
            model,
            temperature,
            concise_mode,
            persona,
        }
    }

    /// Synthesize the system instruction from the persona.
    pub fn system_prompt(&self) -> String {
        let persona = self.persona.trim();
        if persona.is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            format!("You are {persona}. Keep responses grounded and directly useful.")
        }
    }

    /// Completion token budget for this request.
    pub fn max_tokens(&self) -> u32 {
        if self.concise_mode {
            MAX_TOKENS_CONCISE
        } else {
            MAX_TOKENS_DEFAULT
        }
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self::from_value(&serde_json::Value::Null)
    }
}
