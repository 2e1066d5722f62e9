// Integration tests
//
// End-to-end tests exercising the full relay path:
// client → relay server → upstream → re-framed stream → client
//
// Uses wiremock as the OpenRouter stand-in and a real relay served on
// an ephemeral port, consumed through the real ChatClient.

use std::net::SocketAddr;
use std::sync::Arc;

use chat_relay::client::{ChatClient, ClientError};
use chat_relay::config::RelayConfig;
use chat_relay::message::{ChatTurn, Role};
use chat_relay::relay::build_router;
use chat_relay::settings::RequestSettings;
use chat_relay::upstream::{OpenRouterClient, UpstreamClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Infrastructure
// ---------------------------------------------------------------------------

/// Start a real relay bound to an ephemeral port, pointed at the mock
/// provider. Returns its base URL.
async fn spawn_relay(provider_url: &str) -> String {
    let config = Arc::new(RelayConfig {
        upstream_url: format!("{provider_url}/api/v1/chat/completions"),
        api_key: Some("test-key".to_string()),
        ..RelayConfig::default()
    });
    let upstream: Arc<dyn UpstreamClient> = Arc::new(OpenRouterClient::new(config.clone()));
    let app = build_router(upstream, config);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn sse_frames(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|p| format!("data: {p}\n\n"))
        .collect::<String>()
}

async fn mock_provider_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Test 1: streaming end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streamed_reply_arrives_chunk_by_chunk() {
    let provider = MockServer::start().await;
    mock_provider_stream(
        &provider,
        sse_frames(&[
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[{"delta":{}}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
            "[DONE]",
        ]),
    )
    .await;

    let relay = spawn_relay(&provider.uri()).await;
    let client = ChatClient::new(relay);
    let turns = vec![ChatTurn::new(Role::User, "say hello")];

    let mut seen = Vec::new();
    let reply = client
        .stream_chat(&turns, &RequestSettings::default(), |chunk| {
            seen.push(chunk.to_string())
        })
        .await
        .expect("streamed chat should succeed");

    // Callback fired exactly once per chunk, in order.
    assert_eq!(seen, vec!["Hel".to_string(), "lo".to_string()]);
    assert_eq!(reply.text, "Hello");

    let usage = reply.usage.expect("usage should arrive before done");
    assert_eq!(usage.prompt_tokens, 3);
    assert_eq!(usage.completion_tokens, 2);
    assert_eq!(usage.total_tokens, 5);
}

// ---------------------------------------------------------------------------
// Test 2: long conversations are truncated before forwarding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_last_twenty_turns_reach_the_provider() {
    let provider = MockServer::start().await;
    mock_provider_stream(
        &provider,
        sse_frames(&[r#"{"choices":[{"delta":{"content":"ok"}}]}"#, "[DONE]"]),
    )
    .await;

    let relay = spawn_relay(&provider.uri()).await;
    let client = ChatClient::new(relay);
    let turns: Vec<ChatTurn> = (0..25)
        .map(|i| ChatTurn::new(Role::User, format!("turn {i}")))
        .collect();

    client
        .stream_chat(&turns, &RequestSettings::default(), |_| {})
        .await
        .expect("streamed chat should succeed");

    let requests = provider.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = requests[0].body_json().expect("provider body is JSON");

    let messages = body["messages"].as_array().expect("messages array");
    // System instruction plus the last twenty turns.
    assert_eq!(messages.len(), 21);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["content"], "turn 5");
    assert_eq!(messages[20]["content"], "turn 24");
    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);
}

// ---------------------------------------------------------------------------
// Test 3: provider failure before framing reaches the client as JSON
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provider_error_propagates_before_any_stream() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "model melted"}})),
        )
        .mount(&provider)
        .await;

    let relay = spawn_relay(&provider.uri()).await;
    let client = ChatClient::new(relay);

    let err = client
        .stream_chat(&[], &RequestSettings::default(), |_| {})
        .await
        .unwrap_err();

    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "model melted");
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test 4: non-streaming end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_reply_in_one_call() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "  The answer is 4.  "}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 6, "total_tokens": 16}
        })))
        .mount(&provider)
        .await;

    let relay = spawn_relay(&provider.uri()).await;
    let client = ChatClient::new(relay);
    let turns = vec![ChatTurn::new(Role::User, "what is 2+2?")];

    let reply = client
        .chat(&turns, &RequestSettings::default())
        .await
        .expect("chat should succeed");
    assert_eq!(reply.text, "The answer is 4.");
    assert_eq!(reply.usage.expect("usage present").total_tokens, 16);

    // Non-streaming requests never ask the provider to stream.
    let requests = provider.received_requests().await.expect("recorded requests");
    let body: serde_json::Value = requests[0].body_json().expect("provider body is JSON");
    assert!(body.get("stream").is_none());
}

// ---------------------------------------------------------------------------
// Test 5: health probe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_answers_without_credential() {
    // A relay with no API key still reports liveness.
    let config = Arc::new(RelayConfig::default());
    let upstream: Arc<dyn UpstreamClient> = Arc::new(OpenRouterClient::new(config.clone()));
    let app = build_router(upstream, config);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let resp = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .expect("health request");
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.expect("health body");
    assert_eq!(body, json!({"ok": true}));
}
