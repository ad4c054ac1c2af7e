//! WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS (426 for plain HTTP requests)
//! - Derive the session id from the request path and register the session
//! - Lifecycle: ping + idle timeout
//! - Decode client frames and queue them on the session mailbox (never dropped;
//!   a full mailbox pauses reading from the client)
//! - Forward relay events to the client as JSON text frames

use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use tcpbridge_core::protocol::{Command, RelayEvent};

use crate::app_state::AppState;
use crate::obs::GatewayMetrics;
use crate::relay::{EventSink, RelayHandle, RelaySession};
use crate::sessions::session_id_from_path;
use crate::transport::codec::{decode, encode, Inbound};

// --------------------
// Entry
// --------------------
pub async fn ws_upgrade(
    State(app): State<AppState>,
    Path(path): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Expected websocket").into_response();
    };
    let Some(session_id) = session_id_from_path(&path) else {
        return (StatusCode::BAD_REQUEST, "missing session id").into_response();
    };
    if app.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "draining").into_response();
    }

    let max_frame = app.cfg().gateway.max_frame_bytes;
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| {
            let span = tracing::info_span!("session", id = %session_id);
            run_session(app, session_id, socket).instrument(span)
        })
}

struct ActiveSession(Arc<GatewayMetrics>);

impl ActiveSession {
    fn enter(metrics: Arc<GatewayMetrics>) -> Self {
        metrics.ws_upgrades.inc(&[]);
        metrics.sessions_active.inc(&[]);
        Self(metrics)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.sessions_active.dec(&[]);
    }
}

// --------------------
// Core session loop
// --------------------
async fn run_session(app: AppState, session_id: String, socket: WebSocket) {
    let metrics = app.metrics();
    let _active = ActiveSession::enter(Arc::clone(&metrics));

    let gw = &app.cfg().gateway;

    // ---- relay session + its event queue
    let (event_tx, mut event_rx) = mpsc::channel::<RelayEvent>(gw.outbound_queue);
    let session = RelaySession::new(
        session_id.as_str(),
        app.connector(),
        app.cfg().relay.clone(),
        EventSink::new(event_tx),
        Arc::clone(&metrics),
    );
    let handle = RelayHandle::spawn(session, app.cfg().relay.mailbox_capacity);

    let (seq, replaced) = app.sessions().insert(&session_id, handle.stopper());
    if replaced {
        metrics.sessions_replaced.inc(&[]);
        tracing::info!("previous client for this session id was replaced");
    }
    tracing::info!("client attached");

    // ---- split socket
    let (mut ws_tx, mut ws_rx) = socket.split();

    // ---- timers
    let ping_every = Duration::from_millis(gw.ping_interval_ms);
    let idle_timeout = Duration::from_millis(gw.idle_timeout_ms);

    let mut ping_tick = tokio::time::interval(ping_every);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();
    // At most one command parked here; a full mailbox back-pressures the client.
    let mut pending: Option<Command> = None;

    loop {
        tokio::select! {
            // relay events -> client
            maybe_ev = event_rx.recv() => {
                // None: the mailbox stopped (replaced by another client).
                let Some(ev) = maybe_ev else { break; };
                if let RelayEvent::Data(b) = &ev {
                    metrics.relay_bytes.add(&[("dir", "remote_to_client")], b.len() as u64);
                }
                let msg = match encode(&ev) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::error!(error = %e, "event encode failed");
                        continue;
                    }
                };
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }

            // queued command -> mailbox, once there is room
            permit = handle.reserve(), if pending.is_some() => {
                let Ok(permit) = permit else { break; };
                if let Some(cmd) = pending.take() {
                    permit.send(cmd);
                }
            }

            // client -> relay (paused while a command waits for mailbox room)
            incoming = ws_rx.next(), if pending.is_none() => {
                let Some(incoming) = incoming else { break; };
                let Ok(msg) = incoming else { break; };

                last_activity = Instant::now();

                match decode(msg) {
                    Ok(Inbound::Command(cmd)) => {
                        if let Command::Write(b) = &cmd {
                            metrics.relay_bytes.add(&[("dir", "client_to_remote")], b.len() as u64);
                        }
                        pending = Some(cmd);
                    }
                    Ok(Inbound::Ping(payload)) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Ok(Inbound::Pong) => {}
                    Ok(Inbound::Close) => break,
                    Err(e) => {
                        metrics.decode_errors.inc(&[("code", e.client_code().as_str())]);
                        tracing::debug!(error = %e, "undecodable client frame");
                        if let Ok(m) = encode(&RelayEvent::error(e.to_string())) {
                            if ws_tx.send(m).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            // ping
            _ = ping_tick.tick() => {
                let _ = ws_tx.send(Message::Ping(Vec::new())).await;
            }

            // idle timeout
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if last_activity.elapsed() >= idle_timeout {
                    tracing::info!("idle timeout");
                    break;
                }
            }
        }
    }

    // Client gone (or replaced): release the remote side.
    app.sessions().remove(&session_id, seq);
    handle.shutdown().await;
    let _ = ws_tx.close().await;
    tracing::info!("client detached");
}
