//! Callbridge Gateway: telephony media streams in, spoken agent replies out.
//! One voice session per `/media-stream/:agent_id` WebSocket.

use std::sync::Arc;

use anyhow::Context;
use callbridge_core::{AgentStore, BrainService};
use callbridge_gateway::{router, AppState, GatewayConfig};
use callbridge_voice::WsRecognizer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = GatewayConfig::load().context("loading gateway config")?;
    let store = AgentStore::open(Some(&cfg.storage_path))
        .with_context(|| format!("opening agent store at {}", cfg.storage_path))?;

    if cfg.reasoning.api_key.is_empty() {
        tracing::warn!("no reasoning API key configured; replies will be fallback phrases");
    }

    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(BrainService::new(cfg.reasoning.clone())),
        Arc::new(WsRecognizer::new(cfg.recognizer.clone())),
        cfg.synthesis.clone(),
        cfg.session.to_session_config(),
    ));

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "callbridge gateway listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
