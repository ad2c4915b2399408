//! `ConnectionActor` - per-WebSocket connection actor.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one WebSocket
//! - Serializes `ServerMessage`s into JSON text frames
//! - Is cancelled via a child token of the registry's root token
//!
//! The read half stays with the socket task in `ws.rs`, which feeds
//! inbound client messages to the registry and reports the disconnect
//! when the stream ends.

use super::messages::ConnectionMessage;
use crate::errors::RelayError;

use axum::extract::ws;
use common::protocol::ServerMessage;
use common::types::SessionId;
use futures_util::{Sink, SinkExt};
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl ConnectionActorHandle {
    /// Get the session ID this connection belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Deliver a server message to the client.
    pub async fn deliver(&self, message: ServerMessage) -> Result<(), RelayError> {
        self.sender
            .send(ConnectionMessage::Deliver(message))
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the socket.
    pub async fn close(&self, reason: String) -> Result<(), RelayError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S> {
    /// Session this connection belongs to.
    session_id: SessionId,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Write half of the socket.
    sink: S,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl<S> ConnectionActor<S>
where
    S: Sink<ws::Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    /// Spawn a new connection actor over the socket's write half.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session_id: SessionId,
        sink: S,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    async fn run(mut self) {
        debug!(
            target: "relay.actor.connection",
            session_id = %self.session_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_close("cancelled").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        debug!(
            target: "relay.actor.connection",
            session_id = %self.session_id,
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver(server_message) => {
                self.deliver(server_message).await;
                false
            }

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }
        }
    }

    /// Serialize and write one server message.
    async fn deliver(&mut self, message: ServerMessage) {
        if self.is_closing {
            warn!(
                target: "relay.actor.connection",
                session_id = %self.session_id,
                "Attempted to deliver message while closing"
            );
            return;
        }

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!(
                    target: "relay.actor.connection",
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to serialize server message"
                );
                return;
            }
        };

        if let Err(e) = self.sink.send(ws::Message::Text(json)).await {
            // The read side observes the same failure and drives the
            // disconnect; nothing more to do here.
            debug!(
                target: "relay.actor.connection",
                session_id = %self.session_id,
                error = %e,
                "Socket write failed"
            );
            self.is_closing = true;
        }
    }

    /// Send a close frame and shut the sink down.
    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }
        self.is_closing = true;

        debug!(
            target: "relay.actor.connection",
            session_id = %self.session_id,
            reason = %reason,
            "Closing connection"
        );

        let _ = self.sink.send(ws::Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::PollSender;

    fn test_connection(
        session_id: SessionId,
        cancel_token: CancellationToken,
    ) -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<ws::Message>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let (handle, task) = ConnectionActor::spawn(session_id, PollSender::new(tx), cancel_token);
        (handle, task, rx)
    }

    fn decode(frame: ws::Message) -> ServerMessage {
        match frame {
            ws::Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deliver_writes_json_text_frame() {
        let session_id = SessionId::new();
        let (handle, _task, mut rx) = test_connection(session_id, CancellationToken::new());

        handle
            .deliver(ServerMessage::Welcome { session_id })
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(decode(frame), ServerMessage::Welcome { session_id });

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_sends_close_frame_and_exits() {
        let session_id = SessionId::new();
        let (handle, task, mut rx) = test_connection(session_id, CancellationToken::new());

        handle.close("test close".to_string()).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ws::Message::Close(_)));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should exit after close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_closes_socket() {
        let session_id = SessionId::new();
        let cancel_token = CancellationToken::new();
        let (handle, task, mut rx) = test_connection(session_id, cancel_token.clone());

        cancel_token.cancel();

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ws::Message::Close(_)));
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should exit after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (handle, task, _rx) = test_connection(SessionId::new(), parent.child_token());

        parent.cancel();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("actor should exit after parent cancellation")
            .unwrap();
    }
}
