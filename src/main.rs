use std::env;
use std::path::PathBuf;

use anyhow::Context;
use chat_relay::config::RelayConfig;
use chat_relay::server::build_router_with_state;
use chat_relay::session::SessionBackend;
use chat_relay::util::{env_bind_addr, init_tracing, AppState};
use chat_relay::validate::check_endpoint;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    // --config=<path> wins over CHAT_RELAY_CONFIG
    let config_path: Option<PathBuf> = args
        .iter()
        .find_map(|a| a.strip_prefix("--config="))
        .map(str::to_string)
        .or_else(|| env::var("CHAT_RELAY_CONFIG").ok())
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => {
            tracing::info!("Loading relay configuration from: {}", path.display());
            RelayConfig::load(Some(path))?
        }
        None => {
            tracing::info!("No config file provided, using defaults and environment");
            tracing::info!(
                "Usage: {} [--config=relay.json] [--session-backend=memory|sled:<path>]",
                args.first().map(String::as_str).unwrap_or("chat-relay")
            );
            RelayConfig::load(None)?
        }
    };
    tracing::info!(config = ?config, "relay configuration ready");

    if config.api_key.is_empty() {
        tracing::warn!("No API key configured; chat requests will be rejected until one is set");
    }
    if let Err(e) = check_endpoint(&config.endpoint, &config.allowed_hosts) {
        tracing::warn!(error = %e, "configured endpoint is not on the allow-list");
    }

    let backend = SessionBackend::from_args_and_env(&args);
    let store = backend
        .open()
        .with_context(|| format!("failed to open session backend {backend:?}"))?;
    tracing::info!(backend = store.backend_name(), "session store ready");

    let app = build_router_with_state(AppState::new(config, config_path, store));

    let addr = env_bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("chat-relay listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .await
        .context("server error")?;
    Ok(())
}
