//! WebSocket signaling channel.
//!
//! Thin transport glue between the coordinator and the relay server: a
//! writer task drains outbound [`ClientMessage`]s into JSON text
//! frames, a reader task parses inbound frames into [`ServerMessage`]s.
//! The channel owns no session state; when the socket closes, the
//! event stream simply ends and the host tears the call down.

use crate::coordinator::SessionCoordinatorHandle;
use crate::errors::SessionError;

use common::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Buffer for outbound client messages.
const OUTBOUND_BUFFER: usize = 64;

/// Buffer for parsed server events.
const EVENT_BUFFER: usize = 256;

/// A connected signaling channel.
pub struct SignalingChannel {
    /// Sender half: client messages are written in send order.
    pub outbound: mpsc::Sender<ClientMessage>,
    /// Receiver half: parsed server messages; ends when the socket
    /// closes.
    pub events: mpsc::Receiver<ServerMessage>,
}

impl SignalingChannel {
    /// Connect to a relay server (e.g. `ws://host:3000/ws`).
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| SessionError::Transport(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        // Writer: drain client messages into text frames.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(
                            target: "call.transport",
                            error = %e,
                            "Failed to serialize client message"
                        );
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    debug!(
                        target: "call.transport",
                        error = %e,
                        "Socket write failed, stopping writer"
                    );
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: parse text frames into server events. Dropping
        // `event_tx` on exit ends the event stream for the consumer.
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(
                            target: "call.transport",
                            error = %e,
                            "Socket read failed"
                        );
                        break;
                    }
                };

                match frame {
                    Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(
                                target: "call.transport",
                                error = %e,
                                "Malformed server frame, ignoring"
                            );
                        }
                    },
                    Message::Close(_) => break,
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
            debug!(target: "call.transport", "Signaling socket closed");
        });

        Ok(Self {
            outbound: outbound_tx,
            events: event_rx,
        })
    }
}

/// Pump server events into a coordinator until the socket closes.
pub fn bridge(
    mut events: mpsc::Receiver<ServerMessage>,
    coordinator: SessionCoordinatorHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if coordinator.server_event(event).await.is_err() {
                break;
            }
        }
        debug!(target: "call.transport", "Signaling channel ended");
    })
}
