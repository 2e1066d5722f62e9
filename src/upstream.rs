// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Upstream provider client.
//
// Responsibilities:
// - Build the OpenAI-style completion request payload
// - Send it with credential and identification headers attached
// - Translate non-2xx responses into structured relay errors
// - Expose the streaming body as a plain byte stream
//
// The trait is the dependency-injection point: handlers never touch a
// real HTTP client in tests.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::message::ChatTurn;
use crate::settings::RequestSettings;

/// Raw byte stream of an upstream response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

// ---------------------------------------------------------------------------
// Request payload
// ---------------------------------------------------------------------------

/// Build the completion request payload.
///
/// The synthesized system instruction always leads the message list.
/// When `stream` is set, usage reporting is requested via
/// `stream_options` so the final event can carry token counts.
pub fn completion_body(
    turns: &[ChatTurn],
    settings: &RequestSettings,
    stream: bool,
) -> serde_json::Value {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(serde_json::json!({
        "role": "system",
        "content": settings.system_prompt(),
    }));
    for turn in turns {
        messages.push(serde_json::json!({
            "role": turn.role_str(),
            "content": turn.text,
        }));
    }

    let mut body = serde_json::json!({
        "model": settings.model,
        "messages": messages,
        "temperature": settings.temperature,
        "max_tokens": settings.max_tokens(),
    });
    if stream {
        body["stream"] = serde_json::json!(true);
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }
    body
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over the HTTP client that talks to the provider.
///
/// Implementations must be Send + Sync so they can be shared across
/// request handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send a non-streaming completion request and return the parsed
    /// response document. Non-2xx statuses come back as errors.
    async fn complete(&self, body: serde_json::Value) -> Result<serde_json::Value, RelayError>;

    /// Send a streaming completion request and return the raw byte
    /// stream of the response body. Non-2xx statuses come back as
    /// errors before any bytes flow.
    async fn open_stream(&self, body: serde_json::Value) -> Result<ByteStream, RelayError>;
}

// ---------------------------------------------------------------------------
// Error translation
// ---------------------------------------------------------------------------

/// Translate a non-2xx response into a relay error, preferring the
/// provider's own `error.message` over the generic status message.
pub fn status_error(status: u16, body: &[u8]) -> RelayError {
    let message = upstream_error_message(body)
        .unwrap_or_else(|| RelayError::status_message(status));
    RelayError::UpstreamStatus { status, message }
}

/// Streaming variant: when the provider gave no structured message,
/// surface a short prefix of whatever it did send before falling back
/// to the generic status message.
pub fn stream_status_error(status: u16, body: &[u8]) -> RelayError {
    let message = upstream_error_message(body).unwrap_or_else(|| {
        let detail: String = String::from_utf8_lossy(body)
            .chars()
            .take(200)
            .collect();
        if detail.trim().is_empty() {
            RelayError::status_message(status)
        } else {
            detail
        }
    });
    RelayError::UpstreamStatus { status, message }
}

fn upstream_error_message(body: &[u8]) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
    parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.trim().is_empty())
        .map(|m| m.to_string())
}

// ---------------------------------------------------------------------------
// OpenRouter client
// ---------------------------------------------------------------------------

/// Real client for the OpenRouter completion endpoint.
pub struct OpenRouterClient {
    http: reqwest::Client,
    config: Arc<RelayConfig>,
}

impl OpenRouterClient {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Base request with credential and identification headers. Fails
    /// when no API key is configured.
    fn request(&self, body: &serde_json::Value) -> Result<reqwest::RequestBuilder, RelayError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(RelayError::MissingCredential)?;

        let mut req = self
            .http
            .post(&self.config.upstream_url)
            .bearer_auth(key)
            .json(body);
        if let Some(referer) = &self.config.http_referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.x_title {
            req = req.header("X-Title", title);
        }
        Ok(req)
    }
}

#[async_trait::async_trait]
impl UpstreamClient for OpenRouterClient {
    async fn complete(&self, body: serde_json::Value) -> Result<serde_json::Value, RelayError> {
        let timeout = self.config.request_timeout;
        let resp = self
            .request(&body)?
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::UpstreamTimeout {
                        secs: timeout.as_secs(),
                    }
                } else {
                    RelayError::Transport(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(status_error(status, &bytes));
        }

        // An unparseable success body yields Null, which reads as an
        // empty reply downstream rather than a transport failure.
        Ok(serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    async fn open_stream(&self, body: serde_json::Value) -> Result<ByteStream, RelayError> {
        // No per-request timeout here: the forwarding task enforces the
        // stream deadline so long completions are not cut off early by
        // the HTTP layer. Failing to reach the provider at all maps to
        // the unavailable-stream error.
        let resp = self.request(&body)?.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::UpstreamTimeout {
                    secs: self.config.stream_timeout.as_secs(),
                }
            } else {
                RelayError::StreamUnavailable
            }
        })?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(stream_status_error(status, &bytes));
        }

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RelayError::Transport(e.to_string())));
        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
