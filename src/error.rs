// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

// Relay error taxonomy.
//
// Every variant that can reach a client before stream framing begins
// maps to a status code and a JSON `{error}` body via IntoResponse.
// After framing begins, errors are re-encoded as in-stream events by
// the relay handler instead (headers can no longer change).
//
// A malformed upstream event is deliberately NOT represented here:
// single corrupt frames are skipped inside the reframer and never
// propagate.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

/// Errors surfaced by the relay endpoints and the upstream client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("OPENROUTER_API_KEY is not set in your environment.")]
    MissingCredential,

    /// Non-2xx from the upstream provider. `message` is upstream's own
    /// error text when parseable, otherwise a generic status-coded one.
    #[error("{message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("OpenRouter timed out after {secs}s. Try again or switch models.")]
    UpstreamTimeout { secs: u64 },

    #[error("OpenRouter stream is unavailable.")]
    StreamUnavailable,

    #[error("OpenRouter returned an empty response.")]
    EmptyResponse,

    #[error("{0}")]
    Transport(String),
}

impl RelayError {
    /// Generic message for a non-2xx upstream response whose body did not
    /// carry a usable error string.
    pub fn status_message(status: u16) -> String {
        format!("OpenRouter request failed with status {status}.")
    }

    /// HTTP status this error maps to when returned before stream framing.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::StreamUnavailable => StatusCode::BAD_GATEWAY,
            RelayError::EmptyResponse => StatusCode::BAD_GATEWAY,
            RelayError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
