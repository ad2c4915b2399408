//! Signaling wire protocol.
//!
//! JSON text frames over the WebSocket transport, tagged by a
//! kebab-case `type` field. Signal payloads are relayed verbatim by the
//! server and never interpreted or stored.

use crate::types::{RoomId, SessionId};
use serde::{Deserialize, Serialize};

/// A network reachability hint exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate line itself.
    pub candidate: String,
    /// Media stream identification tag, if the engine provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Opaque negotiation payload carried between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalPayload {
    /// A session description proposing a media configuration.
    Offer { sdp: String },
    /// The accepting half of a description exchange.
    Answer { sdp: String },
    /// A reachability hint; may arrive at any point of the exchange.
    Candidate { candidate: IceCandidate },
}

impl SignalPayload {
    /// Payload kind as a string, for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
        }
    }
}

/// Wire projection of a room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub session_id: SessionId,
    pub display_name: String,
    /// Informational self-mute flag, so late joiners render correct
    /// mute badges without waiting for the next change.
    pub audio_muted: bool,
}

/// Messages sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join a room. Idempotent; a repeat join updates the display name.
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },
    /// Leave a single room without disconnecting.
    LeaveRoom { room_id: RoomId },
    /// Relay a negotiation payload to another session.
    Signal {
        target: SessionId,
        payload: SignalPayload,
    },
    /// Informational self-mute change, broadcast best-effort.
    MuteChanged { muted: bool },
}

/// Messages sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection: the assigned session ID.
    Welcome { session_id: SessionId },
    /// Delivered once to a joiner: the room's current co-members.
    ExistingMembers { members: Vec<MemberInfo> },
    /// Delivered to prior members when someone joins.
    PeerJoined {
        session_id: SessionId,
        display_name: String,
    },
    /// A relayed negotiation payload.
    Signal {
        from: SessionId,
        payload: SignalPayload,
    },
    /// Delivered to remaining members when someone leaves or drops.
    PeerLeft { session_id: SessionId },
    /// Best-effort mute state broadcast.
    PeerMuteChanged { session_id: SessionId, muted: bool },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tags_match_wire_contract() {
        let json = serde_json::to_value(ClientMessage::JoinRoom {
            room_id: RoomId::new("main"),
            display_name: "alice".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "join-room");
        assert_eq!(json["room_id"], "main");
        assert_eq!(json["display_name"], "alice");

        let json = serde_json::to_value(ClientMessage::MuteChanged { muted: true }).unwrap();
        assert_eq!(json["type"], "mute-changed");
    }

    #[test]
    fn test_server_message_tags_match_wire_contract() {
        let id = SessionId::new();
        let json = serde_json::to_value(ServerMessage::PeerLeft { session_id: id }).unwrap();
        assert_eq!(json["type"], "peer-left");

        let json = serde_json::to_value(ServerMessage::PeerMuteChanged {
            session_id: id,
            muted: false,
        })
        .unwrap();
        assert_eq!(json["type"], "peer-mute-changed");
    }

    #[test]
    fn test_signal_payload_roundtrip_through_relay() {
        // The relay forwards payloads verbatim; a decode of what was
        // encoded must be identical.
        let payload = SignalPayload::Candidate {
            candidate: IceCandidate {
                candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        };
        let json = serde_json::to_string(&payload).unwrap();
        let decoded: SignalPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_candidate_optional_fields_are_omitted() {
        let payload = SignalPayload::Candidate {
            candidate: IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            },
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("sdp_mid"));
        assert!(!json.contains("sdp_mline_index"));
    }

    #[test]
    fn test_unknown_message_type_is_an_error() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"start-media"}"#);
        assert!(result.is_err());
    }
}
