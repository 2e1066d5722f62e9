// Copyright 2026 The Chat Relay Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

use chat_relay::config::RelayConfig;
use chat_relay::relay;
use chat_relay::upstream::{OpenRouterClient, UpstreamClient};

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chat-relay", about = "Streaming chat relay for OpenRouter")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8787, env = "CHAT_RELAY_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Arc::new(RelayConfig::from_env());
    if config.api_key.is_none() {
        // Not fatal: the server still answers /api/health and returns a
        // structured message per request.
        tracing::warn!("OPENROUTER_API_KEY is not set; chat requests will fail");
    }
    tracing::info!(upstream = %config.upstream_url, "config loaded");

    let upstream: Arc<dyn UpstreamClient> = Arc::new(OpenRouterClient::new(config.clone()));
    let app = relay::build_router(upstream, config);

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "chat-relay listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}
