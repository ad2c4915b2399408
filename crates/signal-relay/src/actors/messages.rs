//! Message types exchanged with the relay actors.

use super::connection::ConnectionActorHandle;
use crate::errors::RelayError;

use common::protocol::{MemberInfo, ServerMessage, SignalPayload};
use common::types::{RoomId, SessionId};
use tokio::sync::oneshot;

/// Messages handled by the `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// A new WebSocket connection was accepted.
    Connect {
        session_id: SessionId,
        connection: ConnectionActorHandle,
    },

    /// Join a room (idempotent; repeat join updates the display name).
    Join {
        session_id: SessionId,
        room_id: RoomId,
        display_name: String,
        respond_to: oneshot::Sender<Result<MembershipSnapshot, RelayError>>,
    },

    /// Explicit leave of a single room.
    Leave {
        session_id: SessionId,
        room_id: RoomId,
    },

    /// The connection closed; evict the session from every room.
    /// Sent exactly once per connection by the socket task.
    Disconnect { session_id: SessionId },

    /// Forward a signal payload verbatim to the target session.
    Relay {
        from: SessionId,
        target: SessionId,
        payload: SignalPayload,
    },

    /// Informational mute change, broadcast to co-members.
    MuteChanged { session_id: SessionId, muted: bool },

    /// Current members of a room (empty for unknown rooms).
    MembersOf {
        room_id: RoomId,
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },

    /// Registry status for the health surface and tests.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// The membership view returned to a joiner: the room's co-members at
/// the instant the join was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub room_id: RoomId,
    pub members: Vec<MemberInfo>,
}

/// Point-in-time registry counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub sessions: usize,
    pub rooms: usize,
}

/// Messages handled by a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Deliver a server message to the client as a JSON text frame.
    Deliver(ServerMessage),

    /// Close the socket.
    Close { reason: String },
}
