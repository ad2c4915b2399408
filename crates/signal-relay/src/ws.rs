//! WebSocket transport layer.
//!
//! Each accepted socket gets a fresh `SessionId` and a
//! `ConnectionActor` over its write half; the read half stays in the
//! per-socket task below, which parses `ClientMessage` frames and
//! forwards them to the registry. When the stream ends - clean close,
//! protocol error, or TCP drop - the task reports the disconnect to
//! the registry exactly once.

use crate::actors::{ConnectionActor, RoomRegistryHandle};
use crate::observability::{health_router, HealthState};

use axum::{
    extract::{
        ws::{self, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use common::protocol::{ClientMessage, ServerMessage};
use common::types::SessionId;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Build the application router: the signaling WebSocket, health
/// endpoints, and the static client assets at `/`.
pub fn app_router(
    registry: RoomRegistryHandle,
    health_state: Arc<HealthState>,
    static_root: &Path,
) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(registry)
        .merge(health_router(health_state))
        .fallback_service(ServeDir::new(static_root))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Upgrade handler for the signaling WebSocket.
async fn ws_handler(
    State(registry): State<RoomRegistryHandle>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Per-socket task: owns the read half for the connection's lifetime.
async fn handle_socket(socket: WebSocket, registry: RoomRegistryHandle) {
    let session_id = SessionId::new();
    let (sink, mut stream) = socket.split();

    let (connection, _task) = ConnectionActor::spawn(session_id, sink, registry.child_token());

    if let Err(e) = registry.connect(session_id, connection.clone()).await {
        warn!(
            target: "relay.ws",
            session_id = %session_id,
            error = %e,
            "Failed to register connection"
        );
        return;
    }

    info!(target: "relay.ws", session_id = %session_id, "Connection accepted");

    if connection
        .deliver(ServerMessage::Welcome { session_id })
        .await
        .is_err()
    {
        let _ = registry.disconnect(session_id).await;
        return;
    }

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(
                    target: "relay.ws",
                    session_id = %session_id,
                    error = %e,
                    "Socket read failed"
                );
                break;
            }
        };

        match frame {
            ws::Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => dispatch(session_id, message, &registry).await,
                Err(e) => {
                    // Malformed frames are logged and skipped; the
                    // session stays up.
                    warn!(
                        target: "relay.ws",
                        session_id = %session_id,
                        error = %e,
                        "Malformed client frame, ignoring"
                    );
                }
            },
            ws::Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            ws::Message::Binary(_) | ws::Message::Ping(_) | ws::Message::Pong(_) => {}
        }
    }

    // Exactly one disconnect per connection, whatever ended the stream.
    if let Err(e) = registry.disconnect(session_id).await {
        debug!(
            target: "relay.ws",
            session_id = %session_id,
            error = %e,
            "Registry gone during disconnect"
        );
    }

    info!(target: "relay.ws", session_id = %session_id, "Connection closed");
}

/// Route one parsed client message to the registry.
async fn dispatch(session_id: SessionId, message: ClientMessage, registry: &RoomRegistryHandle) {
    let result = match message {
        ClientMessage::JoinRoom {
            room_id,
            display_name,
        } => registry
            .join(session_id, room_id, display_name)
            .await
            .map(|_snapshot| ()),
        ClientMessage::LeaveRoom { room_id } => registry.leave(session_id, room_id).await,
        ClientMessage::Signal { target, payload } => {
            registry.relay(session_id, target, payload).await
        }
        ClientMessage::MuteChanged { muted } => registry.mute_changed(session_id, muted).await,
    };

    if let Err(e) = result {
        warn!(
            target: "relay.ws",
            session_id = %session_id,
            error = %e,
            "Failed to process client message"
        );
    }
}
