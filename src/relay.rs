// Relay HTTP surface.
//
// Responsibilities:
// - POST /api/chat         -> full completion as one JSON reply
// - POST /api/chat/stream  -> re-framed event stream
// - GET  /api/health       -> liveness probe
//
// Both chat endpoints share request normalization and the credential
// gate. Before stream framing begins, errors are ordinary JSON status
// responses; once the event-stream headers are out, failures become
// in-stream `error` events because the status can no longer change.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{RelayConfig, MAX_BODY_BYTES};
use crate::error::RelayError;
use crate::message::{recent_turns, ChatReply, ChatTurn, StreamEvent, Usage};
use crate::settings::RequestSettings;
use crate::sse::DeltaReframer;
use crate::upstream::{completion_body, ByteStream, UpstreamClient};

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
    pub config: Arc<RelayConfig>,
}

/// Build the axum router. The upstream client is injected — handlers
/// never construct a real HTTP client themselves.
pub fn build_router(upstream: Arc<dyn UpstreamClient>, config: Arc<RelayConfig>) -> Router {
    let state = AppState { upstream, config };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request normalization
// ---------------------------------------------------------------------------

/// Normalized inbound chat request.
struct ChatRequest {
    turns: Vec<ChatTurn>,
    settings: RequestSettings,
}

/// Read and normalize the request body.
///
/// An empty body means all defaults; malformed JSON is the one inbound
/// shape that gets rejected rather than normalized.
async fn read_request(request: Request<Body>) -> Result<ChatRequest, Response> {
    let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("failed to read request body: {e}") })),
            )
                .into_response()
        })?;

    let root = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Request body is not valid JSON." })),
            )
                .into_response()
        })?
    };

    let turns = recent_turns(root.get("messages").unwrap_or(&serde_json::Value::Null));
    let settings =
        RequestSettings::from_value(root.get("settings").unwrap_or(&serde_json::Value::Null));
    Ok(ChatRequest { turns, settings })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// Non-streaming chat: one upstream call, one JSON reply.
async fn chat(State(state): State<AppState>, request: Request<Body>) -> Response {
    let req = match read_request(request).await {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if state.config.api_key.is_none() {
        return RelayError::MissingCredential.into_response();
    }

    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        %request_id,
        model = %req.settings.model,
        turns = req.turns.len(),
        "chat request"
    );

    let body = completion_body(&req.turns, &req.settings, false);
    let doc = match state.upstream.complete(body).await {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(%request_id, error = %e, "chat request failed");
            return e.into_response();
        }
    };

    let Some(text) = extract_reply_text(&doc) else {
        tracing::warn!(%request_id, "chat request produced no text");
        return RelayError::EmptyResponse.into_response();
    };

    let usage = doc.get("usage").and_then(Usage::from_loose);

    Json(ChatReply { text, usage }).into_response()
}

/// Streaming chat: re-frames the upstream event stream into the relay's
/// own wire format.
async fn chat_stream(State(state): State<AppState>, request: Request<Body>) -> Response {
    let req = match read_request(request).await {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if state.config.api_key.is_none() {
        return RelayError::MissingCredential.into_response();
    }

    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        %request_id,
        model = %req.settings.model,
        turns = req.turns.len(),
        "chat stream request"
    );

    // One deadline covers the whole call, including the initial send.
    let timeout_secs = state.config.stream_timeout.as_secs();
    let deadline = Instant::now() + state.config.stream_timeout;

    let body = completion_body(&req.turns, &req.settings, true);
    let opened = tokio::time::timeout_at(deadline, state.upstream.open_stream(body)).await;
    let upstream = match opened {
        Err(_) => {
            let e = RelayError::UpstreamTimeout { secs: timeout_secs };
            tracing::warn!(%request_id, error = %e, "chat stream request failed");
            return e.into_response();
        }
        Ok(Err(e)) => {
            tracing::warn!(%request_id, error = %e, "chat stream request failed");
            return e.into_response();
        }
        Ok(Ok(stream)) => stream,
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(forward_upstream(
        upstream,
        tx,
        deadline,
        timeout_secs,
        request_id,
    ));

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no");
    match builder.body(Body::from_stream(ReceiverStream::new(rx))) {
        Ok(resp) => resp,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Stream forwarding
// ---------------------------------------------------------------------------

/// Encode one event as a `data: <json>\n\n` frame.
fn frame_event(event: &StreamEvent) -> Bytes {
    let json = serde_json::to_string(event)
        .unwrap_or_else(|_| r#"{"type":"error","error":"event serialization failed"}"#.to_string());
    Bytes::from(format!("data: {json}\n\n"))
}

/// Forward the upstream byte stream to the response channel as relay
/// frames.
///
/// A closed channel means the client went away, whether noticed on a
/// failed send or while parked waiting for upstream data: the task
/// returns and the dropped upstream stream aborts the provider
/// connection. Usage is held back until the upstream closes cleanly so
/// it lands once, right before `done`.
async fn forward_upstream(
    mut upstream: ByteStream,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    deadline: Instant,
    timeout_secs: u64,
    request_id: uuid::Uuid,
) {
    let mut reframer = DeltaReframer::new();

    loop {
        let chunk = tokio::select! {
            chunk = upstream.next() => chunk,
            // Receiver drop must be seen even while upstream is silent,
            // otherwise a disconnect leaks the provider connection for
            // the rest of the deadline window.
            _ = tx.closed() => {
                tracing::debug!(%request_id, "client disconnected mid-stream");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                let e = RelayError::UpstreamTimeout { secs: timeout_secs };
                tracing::warn!(%request_id, error = %e, "chat stream deadline expired");
                let event = StreamEvent::Error { error: e.to_string() };
                let _ = tx.send(Ok(frame_event(&event))).await;
                return;
            }
        };

        match chunk {
            None => break,
            Some(Ok(bytes)) => {
                for text in reframer.push(&bytes) {
                    let event = StreamEvent::Chunk { text };
                    if tx.send(Ok(frame_event(&event))).await.is_err() {
                        tracing::debug!(%request_id, "client disconnected mid-stream");
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(%request_id, error = %e, "upstream stream failed");
                let event = StreamEvent::Error { error: e.to_string() };
                let _ = tx.send(Ok(frame_event(&event))).await;
                return;
            }
        }
    }

    if let Some(usage) = reframer.usage() {
        let event = StreamEvent::Usage { usage };
        if tx.send(Ok(frame_event(&event))).await.is_err() {
            return;
        }
    }
    let _ = tx.send(Ok(frame_event(&StreamEvent::Done))).await;
    tracing::info!(%request_id, "chat stream completed");
}

// ---------------------------------------------------------------------------
// Reply extraction
// ---------------------------------------------------------------------------

/// Extract the reply text from a full completion document.
///
/// Content is either a plain string or a list of parts whose `text`
/// fields are joined with newlines. The result is trimmed; whitespace
/// only counts as no reply.
fn extract_reply_text(doc: &serde_json::Value) -> Option<String> {
    let content = doc
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))?;

    let text = match content {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => return None,
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
