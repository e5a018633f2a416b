//! Channel endpoint: handshake and per-connection pump.
//!
//! Each accepted socket runs one pump that drains the connection's
//! unbounded outbound queue into the sink and feeds inbound frames to the
//! router (pongs go to the registry). Senders never block on this pump:
//! dispatch enqueues and moves on, so one slow socket cannot delay
//! dispatch to its siblings.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use elytra_control::{Outbound, PeerRole};

use crate::AppState;

/// Handshake query parameters.
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    /// Declared role; anything but `observer` is a worker.
    pub role: Option<String>,
    /// Advisory client hint, recorded as connection metadata.
    #[serde(rename = "isMobile")]
    pub is_mobile: Option<bool>,
}

/// `GET /ws`
pub async fn channel_handler(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let role = PeerRole::from_handshake(params.role.as_deref());
    let is_mobile = params.is_mobile.unwrap_or(false);
    upgrade.on_upgrade(move |socket| serve_connection(state, socket, role, is_mobile))
}

async fn serve_connection(state: AppState, socket: WebSocket, role: PeerRole, is_mobile: bool) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = state.registry.accept(outbound_tx, role, is_mobile);
    let id = handle.id;

    // One loop over both directions so a Close pushed by the liveness sweep
    // tears the whole connection down, not just the write half.
    loop {
        tokio::select! {
            out = outbound_rx.recv() => {
                let sent = match out {
                    Some(Outbound::Frame(json)) => sink.send(Message::Text(json)).await,
                    Some(Outbound::Ping) => sink.send(Message::Ping(Vec::new())).await,
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => state.router.dispatch(id, &text),
                Some(Ok(Message::Pong(_))) => state.registry.mark_pong(id),
                // The transport layer answers pings for us.
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection_id = %id, "dropping unexpected binary frame");
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            },
        }
    }

    state.registry.remove(id);
    drop(handle);
    info!(connection_id = %id, "channel connection closed");
}
