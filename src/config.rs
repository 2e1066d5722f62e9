// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Relay configuration — credential and identification headers come from
// the process environment. A missing credential is NOT a startup error:
// it is surfaced per request as a configuration error so the server can
// still answer /api/health and return a structured message to the UI.

use std::time::Duration;

/// Default upstream completion endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Wall-clock deadline for the non-streaming chat call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Wall-clock deadline for the streaming chat call.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum accepted request body size (matches the 1 MB UI payload cap).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Full URL of the upstream chat-completion endpoint.
    pub upstream_url: String,
    /// Bearer credential for the upstream. `None` means unconfigured.
    pub api_key: Option<String>,
    /// Optional `HTTP-Referer` identification header.
    pub http_referer: Option<String>,
    /// Optional `X-Title` identification header.
    pub x_title: Option<String>,
    /// Deadline for non-streaming upstream calls.
    pub request_timeout: Duration,
    /// Deadline for streaming upstream calls (shared with the forwarder).
    pub stream_timeout: Duration,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// `OPENROUTER_API_KEY` is the credential; `OPENROUTER_HTTP_REFERER`
    /// and `OPENROUTER_X_TITLE` are optional identification headers.
    /// `CHAT_RELAY_UPSTREAM_URL` overrides the upstream endpoint.
    pub fn from_env() -> Self {
        Self {
            upstream_url: std::env::var("CHAT_RELAY_UPSTREAM_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            api_key: non_empty(std::env::var("OPENROUTER_API_KEY").ok()),
            http_referer: non_empty(std::env::var("OPENROUTER_HTTP_REFERER").ok()),
            x_title: non_empty(std::env::var("OPENROUTER_X_TITLE").ok()),
            request_timeout: REQUEST_TIMEOUT,
            stream_timeout: STREAM_TIMEOUT,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
            http_referer: None,
            x_title: None,
            request_timeout: REQUEST_TIMEOUT,
            stream_timeout: STREAM_TIMEOUT,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
