//! Presence and live relay over WebSocket
//!
//! Each text frame carries one JSON event (see [`parley_relay::protocol`]).
//! The reader loop feeds events to the lifecycle manager and relay engine in
//! arrival order; a writer task drains the connection's outbound queue.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use parley_relay::{ClientEvent, Connection, MessageEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// GET /ws
///
/// Upgrades the HTTP connection; the socket is unbound until it sends
/// `add-user`.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut connection, mut outbound) = state.lifecycle.accept();
    let connection_id = connection.id();
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(connection_id = %connection_id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(frame)).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let msg = tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!(connection_id = %connection_id, "Server shutting down, closing WebSocket");
                break;
            }
            msg = stream.next() => msg,
        };

        let Some(msg) = msg else {
            debug!(connection_id = %connection_id, "WebSocket stream ended");
            break;
        };

        match msg {
            Ok(Message::Text(text)) => handle_frame(&state, &mut connection, &text).await,
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary WebSocket message (not supported)");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pongs are queued by the protocol layer
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "WebSocket close requested");
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.lifecycle.disconnect(&mut connection);
    drop(connection);
    writer.abort();

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Dispatch one client frame. Malformed frames are logged and skipped.
async fn handle_frame(state: &AppState, connection: &mut Connection, frame: &str) {
    let event = match ClientEvent::parse(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(connection_id = %connection.id(), error = %e, "Ignoring malformed frame");
            return;
        }
    };

    match event {
        ClientEvent::AddUser(user_id) => {
            state.lifecycle.bind(connection, user_id);
        }
        ClientEvent::SendMessage(send) => {
            let sender = connection.user_id().cloned().or(send.from);
            let outcome = state
                .relay
                .relay(MessageEvent::new(sender, send.to, send.msg))
                .await;
            debug!(
                connection_id = %connection.id(),
                delivered = outcome.is_delivered(),
                persisted = outcome.is_persisted(),
                "Relayed message"
            );
        }
    }
}
