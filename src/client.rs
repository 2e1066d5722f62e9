// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Client-side consumer of the relay endpoints.
//
// Mirrors the server's buffering: relay frames arrive chunked at
// arbitrary boundaries, so the same line buffer carries partial lines
// across reads. Only the payload decoder differs — here the payloads
// are the relay's own tagged events, not provider deltas.

use std::time::Duration;

use futures_util::StreamExt;

use crate::message::{ChatReply, ChatTurn, StreamEvent, Usage};
use crate::settings::RequestSettings;
use crate::sse::{parse_data_line, LineBuffer};

/// Wall-clock deadline for one chat call, streaming or not.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced to the caller of [`ChatClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Non-2xx from the relay before any stream framing.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// An `error` event arrived mid-stream; partial text is discarded.
    #[error("{0}")]
    Relay(String),

    #[error("Request timed out after {secs}s. Try again or choose a faster model.")]
    Timeout { secs: u64 },

    #[error("API did not return a stream body.")]
    MissingBody,

    #[error("API returned an empty streamed response.")]
    EmptyResponse,

    #[error("{0}")]
    Transport(String),
}

/// Decode a non-2xx relay response body, preferring its JSON `{error}`
/// message over a raw body prefix.
fn decode_error(status: u16, body: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.as_str())
                .filter(|m| !m.trim().is_empty())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| {
            let prefix: String = String::from_utf8_lossy(body).chars().take(180).collect();
            format!("API error {status}: {prefix}")
        });
    ClientError::Api { status, message }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for a running relay.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: CLIENT_TIMEOUT,
        }
    }

    /// Override the call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_body(turns: &[ChatTurn], settings: &RequestSettings) -> serde_json::Value {
        serde_json::json!({
            "messages": turns,
            "settings": {
                "model": settings.model,
                "temperature": settings.temperature,
                "conciseMode": settings.concise_mode,
                "persona": settings.persona,
            },
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            ClientError::Transport(e.to_string())
        }
    }

    /// Non-streaming chat call: the full reply in one JSON document.
    pub async fn chat(
        &self,
        turns: &[ChatTurn],
        settings: &RequestSettings,
    ) -> Result<ChatReply, ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&Self::request_body(turns, settings))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        if !(200..300).contains(&status) {
            return Err(decode_error(status, &bytes));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Transport(format!("invalid JSON from relay: {e}")))
    }

    /// Streaming chat call. `on_chunk` fires once per `chunk` event, in
    /// arrival order; the returned reply carries the accumulated text
    /// and the usage block if one arrived.
    ///
    /// An `error` event aborts the call and discards partial text. A
    /// stream whose accumulated text is whitespace-only is an error,
    /// not an empty reply.
    pub async fn stream_chat(
        &self,
        turns: &[ChatTurn],
        settings: &RequestSettings,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<ChatReply, ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/chat/stream", self.base_url))
            .json(&Self::request_body(turns, settings))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(decode_error(status, &bytes));
        }

        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut text = String::new();
        let mut usage: Option<Usage> = None;
        let mut saw_bytes = false;
        let mut done = false;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.map_send_error(e))?;
            saw_bytes = true;

            for line in lines.push(&chunk) {
                let Some(payload) = parse_data_line(&line) else {
                    continue;
                };
                // Unknown or malformed frames are skipped, same as the
                // relay does with the provider's.
                let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
                    continue;
                };
                match event {
                    StreamEvent::Chunk { text: delta } => {
                        on_chunk(&delta);
                        text.push_str(&delta);
                    }
                    StreamEvent::Usage { usage: u } => usage = Some(u),
                    StreamEvent::Done => {
                        done = true;
                        break 'read;
                    }
                    StreamEvent::Error { error } => return Err(ClientError::Relay(error)),
                }
            }
        }

        if !saw_bytes && !done {
            return Err(ClientError::MissingBody);
        }
        if text.trim().is_empty() {
            return Err(ClientError::EmptyResponse);
        }
        Ok(ChatReply { text, usage })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
