//! WebSocket integration tests.
//!
//! Drives a real server instance over real sockets with raw
//! tokio-tungstenite clients, exercising the full join/signal/leave
//! wire contract.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use common::protocol::{ClientMessage, ServerMessage, SignalPayload};
use common::types::{RoomId, SessionId};
use futures_util::{SinkExt, StreamExt};
use signal_relay::actors::RoomRegistryHandle;
use signal_relay::metrics::RelayMetrics;
use signal_relay::observability::HealthState;
use signal_relay::ws::app_router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on an ephemeral port; returns the ws URL.
async fn start_server() -> String {
    let metrics = RelayMetrics::new();
    let registry = RoomRegistryHandle::new(metrics);
    let health_state = Arc::new(HealthState::new());
    let app = app_router(registry, health_state, Path::new("public"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{addr}/ws")
}

/// Connect and consume the welcome message.
async fn connect(url: &str) -> (WsClient, SessionId) {
    let (mut ws, _response) = connect_async(url).await.unwrap();
    let welcome = recv(&mut ws).await;
    let ServerMessage::Welcome { session_id } = welcome else {
        panic!("expected welcome, got {welcome:?}");
    };
    (ws, session_id)
}

async fn send(ws: &mut WsClient, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

async fn recv(ws: &mut WsClient) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("socket closed")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn assert_silent(ws: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(100), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

async fn join(ws: &mut WsClient, room: &str, name: &str) {
    send(
        ws,
        &ClientMessage::JoinRoom {
            room_id: RoomId::new(room),
            display_name: name.to_string(),
        },
    )
    .await;
}

#[tokio::test]
async fn test_welcome_assigns_unique_session_ids() {
    let url = start_server().await;
    let (_alice, alice_id) = connect(&url).await;
    let (_bob, bob_id) = connect(&url).await;
    assert_ne!(alice_id, bob_id);
}

#[tokio::test]
async fn test_join_flow_delivers_snapshot_and_broadcast() {
    let url = start_server().await;

    let (mut alice, alice_id) = connect(&url).await;
    join(&mut alice, "main", "alice").await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::ExistingMembers { members: vec![] }
    );

    let (mut bob, bob_id) = connect(&url).await;
    join(&mut bob, "main", "bob").await;

    // Bob's snapshot contains exactly Alice.
    let snapshot = recv(&mut bob).await;
    let ServerMessage::ExistingMembers { members } = snapshot else {
        panic!("expected existing-members, got {snapshot:?}");
    };
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].session_id, alice_id);
    assert_eq!(members[0].display_name, "alice");

    // Alice learns about Bob.
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::PeerJoined {
            session_id: bob_id,
            display_name: "bob".to_string()
        }
    );
}

#[tokio::test]
async fn test_signal_is_relayed_verbatim_to_target_only() {
    let url = start_server().await;

    let (mut alice, alice_id) = connect(&url).await;
    join(&mut alice, "main", "alice").await;
    let _ = recv(&mut alice).await;

    let (mut bob, bob_id) = connect(&url).await;
    join(&mut bob, "main", "bob").await;
    let _ = recv(&mut bob).await; // existing-members
    let _ = recv(&mut alice).await; // peer-joined

    let payload = SignalPayload::Offer {
        sdp: "v=0 alice-offer".to_string(),
    };
    send(
        &mut alice,
        &ClientMessage::Signal {
            target: bob_id,
            payload: payload.clone(),
        },
    )
    .await;

    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::Signal {
            from: alice_id,
            payload
        }
    );
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn test_relay_to_unknown_target_is_dropped_silently() {
    let url = start_server().await;

    let (mut alice, _alice_id) = connect(&url).await;
    join(&mut alice, "main", "alice").await;
    let _ = recv(&mut alice).await;

    send(
        &mut alice,
        &ClientMessage::Signal {
            target: SessionId::new(),
            payload: SignalPayload::Answer {
                sdp: "v=0 to-nobody".to_string(),
            },
        },
    )
    .await;

    // No error comes back, and the connection keeps working.
    assert_silent(&mut alice).await;

    let (mut bob, bob_id) = connect(&url).await;
    join(&mut bob, "main", "bob").await;
    let _ = recv(&mut bob).await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::PeerJoined {
            session_id: bob_id,
            display_name: "bob".to_string()
        }
    );
}

#[tokio::test]
async fn test_disconnect_broadcasts_peer_left() {
    let url = start_server().await;

    let (mut alice, alice_id) = connect(&url).await;
    join(&mut alice, "main", "alice").await;
    let _ = recv(&mut alice).await;

    let (mut bob, _bob_id) = connect(&url).await;
    join(&mut bob, "main", "bob").await;
    let _ = recv(&mut bob).await;
    let _ = recv(&mut alice).await;

    drop(alice);

    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::PeerLeft {
            session_id: alice_id
        }
    );
}

#[tokio::test]
async fn test_explicit_leave_room() {
    let url = start_server().await;

    let (mut alice, alice_id) = connect(&url).await;
    join(&mut alice, "main", "alice").await;
    let _ = recv(&mut alice).await;

    let (mut bob, _bob_id) = connect(&url).await;
    join(&mut bob, "main", "bob").await;
    let _ = recv(&mut bob).await;
    let _ = recv(&mut alice).await;

    send(
        &mut alice,
        &ClientMessage::LeaveRoom {
            room_id: RoomId::new("main"),
        },
    )
    .await;

    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::PeerLeft {
            session_id: alice_id
        }
    );

    // Alice is still connected and can rejoin.
    join(&mut alice, "main", "alice").await;
    let snapshot = recv(&mut alice).await;
    assert!(matches!(snapshot, ServerMessage::ExistingMembers { members } if members.len() == 1));
}

#[tokio::test]
async fn test_mute_change_is_broadcast() {
    let url = start_server().await;

    let (mut alice, alice_id) = connect(&url).await;
    join(&mut alice, "main", "alice").await;
    let _ = recv(&mut alice).await;

    let (mut bob, _bob_id) = connect(&url).await;
    join(&mut bob, "main", "bob").await;
    let _ = recv(&mut bob).await;
    let _ = recv(&mut alice).await;

    send(&mut alice, &ClientMessage::MuteChanged { muted: true }).await;

    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::PeerMuteChanged {
            session_id: alice_id,
            muted: true
        }
    );
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn test_malformed_frame_is_ignored() {
    let url = start_server().await;

    let (mut alice, _alice_id) = connect(&url).await;
    alice
        .send(Message::Text("this is not json".to_string()))
        .await
        .unwrap();
    alice
        .send(Message::Text(r#"{"type":"no-such-event"}"#.to_string()))
        .await
        .unwrap();

    // The session survives and still works.
    join(&mut alice, "main", "alice").await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::ExistingMembers { members: vec![] }
    );
}
