//! tcpbridge gateway
//!
//! - WebSocket endpoint: /<session-id>[/proxy-session]
//! - One relay session per client: tcp_connect / tcp_write / tcp_starttls / tcp_close
//! - Ops: /healthz, /readyz, /metrics
//! - Config: $TCPBRIDGE_CONFIG (default ./tcpbridge.yaml), defaults if absent

use std::net::SocketAddr;
use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

use tcpbridge_core::error::{BridgeError, Result};
use tcpbridge_gateway::{app_state::AppState, config, router};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "tcpbridge-gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::var("TCPBRIDGE_CONFIG").unwrap_or_else(|_| "tcpbridge.yaml".into());
    let cfg = if Path::new(&path).exists() {
        config::load_from_file(&path)?
    } else {
        tracing::warn!(%path, "config file not found; using defaults");
        config::BridgeConfig::default()
    };

    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| BridgeError::Config(format!("gateway.listen must be a valid SocketAddr: {e}")))?;

    let state = AppState::new(cfg)?;
    let app = router::build_router(state.clone());

    tracing::info!(%listen, "tcpbridge-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| BridgeError::Internal(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .map_err(|e| BridgeError::Internal(format!("server failed: {e}")))
}

async fn shutdown_signal(state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested; draining sessions");
    state.start_draining();
}
