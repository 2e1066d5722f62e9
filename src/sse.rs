// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Event reframing for `data: <json>` line streams.
//
// Upstream delivers `data: <json>\n\n` frames chunked at arbitrary byte
// boundaries; network chunks may split mid-line. `LineBuffer` carries
// the trailing partial line across chunks so a truncated line is never
// parsed. `DeltaReframer` layers the provider payload extraction on
// top: content deltas out, usage captured on the side, malformed
// payloads skipped without failing the stream.
//
// The client-side consumer applies the same buffering to the relay's
// own re-emitted frames; only the payload decoder differs.

use crate::message::Usage;

// ---------------------------------------------------------------------------
// Line buffering
// ---------------------------------------------------------------------------

/// Splits a byte stream into complete lines across chunk boundaries.
///
/// Each `push` appends the chunk and yields every complete line; the
/// last (possibly incomplete) fragment stays buffered for the next
/// chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the complete lines it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].to_string();
            self.buffer.drain(..=newline_pos);
            lines.push(line);
        }
        lines
    }
}

/// Extract the payload of a `data:` line.
///
/// Returns `None` for lines without the `data:` prefix, empty payloads,
/// and the `[DONE]` terminator sentinel — none of those carry events.
pub fn parse_data_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let payload = trimmed.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

// ---------------------------------------------------------------------------
// Provider delta extraction
// ---------------------------------------------------------------------------

/// Extract the content delta from a provider streaming event.
///
/// The delta is either a plain string or a list of parts whose `text`
/// fields are concatenated with no separator (non-string parts are
/// ignored). Empty deltas yield `None`.
pub fn extract_content_delta(payload: &serde_json::Value) -> Option<String> {
    let content = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))?;

    match content {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Reframer
// ---------------------------------------------------------------------------

/// Per-request reframer for the upstream provider stream.
///
/// Feed it raw network chunks; it returns the content deltas each chunk
/// completed, in order, and tracks the last *valid* usage block on the
/// side. An invalid usage block arriving after a valid one leaves the
/// earlier one in place.
#[derive(Debug, Default)]
pub struct DeltaReframer {
    lines: LineBuffer,
    usage: Option<Usage>,
}

impl DeltaReframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one network chunk, returning the content deltas it
    /// completed. Malformed payload lines are skipped, never fatal.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();

        for line in self.lines.push(chunk) {
            let Some(payload_text) = parse_data_line(&line) else {
                continue;
            };
            let Ok(payload) = serde_json::from_str::<serde_json::Value>(payload_text) else {
                continue;
            };

            if let Some(usage_value) = payload.get("usage") {
                if let Some(usage) = Usage::from_loose(usage_value) {
                    self.usage = Some(usage);
                }
            }

            if let Some(delta) = extract_content_delta(&payload) {
                deltas.push(delta);
            }
        }

        deltas
    }

    /// The last valid usage block seen so far, if any.
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }
}
