//! Axum router wiring.
//!
//! Ops endpoints are matched first; every other path is a WebSocket upgrade
//! whose path names the session.

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .route("/*path", get(transport::ws::ws_upgrade))
        .with_state(state)
}
