//! WebSocket upgrade handler and per-connection receive watcher.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;

use crate::AppState;

use super::connection::{ConnState, Connection, WsTransport};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Admit the subscriber, then watch its inbound side until it goes away.
///
/// Removal from the registry runs unconditionally after the watcher loop
/// returns, so an erroring read can never leave a stale entry behind.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();

    let session_id = courier_common::id::prefixed_ulid(courier_common::id::prefix::SUBSCRIBER);
    let conn = Arc::new(Connection::new(
        session_id.clone(),
        Arc::new(WsTransport::new(ws_tx)),
    ));
    state.registry.add(session_id.clone(), conn.clone());

    tracing::info!(
        %session_id,
        subscribers = state.registry.len(),
        "subscriber connected"
    );

    let reason = receive_loop(&conn, ws_rx).await;

    conn.set_state(ConnState::Closed);
    state.registry.remove(&session_id);

    tracing::info!(
        %session_id,
        %reason,
        subscribers = state.registry.len(),
        "subscriber disconnected"
    );
}

/// Block on the inbound side until the connection ends.
///
/// Subscribers are not expected to send application data; this loop exists
/// for liveness and close detection only. Every error is terminal for this
/// one connection and is logged, never propagated.
async fn receive_loop(conn: &Connection, mut ws_rx: SplitStream<WebSocket>) -> &'static str {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                conn.set_state(ConnState::Closing);
                // Ack the close frame before tearing down.
                conn.close().await;
                return "client closed";
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(_) => {
                tracing::debug!(
                    session_id = %conn.session_id,
                    "ignoring inbound frame from subscriber"
                );
            }
            Err(e) => {
                tracing::debug!(?e, session_id = %conn.session_id, "ws read error");
                return "read error";
            }
        }
    }
    "stream ended"
}
