//! `RoomRegistryActor` - singleton owner of room membership and relay
//! state.
//!
//! The registry is the sole source of truth for "who is in the room".
//! All mutation happens inside the single actor task, one mailbox
//! message at a time, which is what gives joins their ordering
//! guarantee: the existing-members snapshot a joiner receives is
//! consistent with the registry at the instant of join, and any
//! concurrent leave generates a later `peer-left` event on the same
//! connection.
//!
//! Relay is stateless forwarding: a signal whose target is gone is
//! silently dropped. The sender eventually observes the absence
//! through a `peer-left` event, never through a relay error.

use super::connection::ConnectionActorHandle;
use super::messages::{MembershipSnapshot, RegistryMessage, RegistryStatus};
use crate::errors::RelayError;
use crate::metrics::RelayMetrics;

use common::protocol::{MemberInfo, ServerMessage, SignalPayload};
use common::types::{RoomId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for the ws layer and tests. All
/// methods are async; queries return results via oneshot channels.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Register a newly accepted connection.
    pub async fn connect(
        &self,
        session_id: SessionId,
        connection: ConnectionActorHandle,
    ) -> Result<(), RelayError> {
        self.sender
            .send(RegistryMessage::Connect {
                session_id,
                connection,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Join a room, returning the co-member snapshot.
    ///
    /// Idempotent: a repeat join updates the display name only. The
    /// same snapshot is also delivered to the joiner's connection as an
    /// `existing-members` message, serialized before any subsequent
    /// broadcast.
    pub async fn join(
        &self,
        session_id: SessionId,
        room_id: RoomId,
        display_name: String,
    ) -> Result<MembershipSnapshot, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::Join {
                session_id,
                room_id,
                display_name,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Leave a single room without disconnecting.
    pub async fn leave(&self, session_id: SessionId, room_id: RoomId) -> Result<(), RelayError> {
        self.sender
            .send(RegistryMessage::Leave {
                session_id,
                room_id,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Report a closed connection. Safe to call for sessions that never
    /// joined anything; must be called exactly once per connection.
    pub async fn disconnect(&self, session_id: SessionId) -> Result<(), RelayError> {
        self.sender
            .send(RegistryMessage::Disconnect { session_id })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Forward a signal payload verbatim to the target session.
    pub async fn relay(
        &self,
        from: SessionId,
        target: SessionId,
        payload: SignalPayload,
    ) -> Result<(), RelayError> {
        self.sender
            .send(RegistryMessage::Relay {
                from,
                target,
                payload,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Record and broadcast an informational mute change.
    pub async fn mute_changed(&self, session_id: SessionId, muted: bool) -> Result<(), RelayError> {
        self.sender
            .send(RegistryMessage::MuteChanged { session_id, muted })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }

    /// Current members of a room (empty for unknown rooms).
    pub async fn members_of(&self, room_id: RoomId) -> Result<Vec<MemberInfo>, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::MembersOf {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Current registry counts.
    pub async fn status(&self) -> Result<RegistryStatus, RelayError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the registry actor (shuts down every connection).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for connection actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// State held per live connection.
struct Session {
    /// Display name from the most recent join, if any.
    display_name: Option<String>,
    /// Rooms this session has explicitly joined.
    rooms: HashSet<RoomId>,
    /// Handle to the connection actor for outbound delivery.
    connection: ConnectionActorHandle,
    /// Connection timestamp.
    connected_at: i64,
    /// Informational self-mute flag, mirrored for late joiners.
    audio_muted: bool,
}

/// The `RoomRegistryActor` implementation.
struct RoomRegistryActor {
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Live sessions by ID.
    sessions: HashMap<SessionId, Session>,
    /// Room membership by room ID.
    rooms: HashMap<RoomId, HashSet<SessionId>>,
    /// Shared metrics.
    metrics: Arc<RelayMetrics>,
}

impl RoomRegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.registry")]
    async fn run(mut self) {
        info!(target: "relay.actor.registry", "RoomRegistryActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "relay.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.registry",
            sessions_remaining = self.sessions.len(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Connect {
                session_id,
                connection,
            } => {
                self.handle_connect(session_id, connection);
            }

            RegistryMessage::Join {
                session_id,
                room_id,
                display_name,
                respond_to,
            } => {
                let result = self.handle_join(session_id, room_id, display_name).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Leave {
                session_id,
                room_id,
            } => {
                self.handle_leave(session_id, &room_id).await;
            }

            RegistryMessage::Disconnect { session_id } => {
                self.handle_disconnect(session_id).await;
            }

            RegistryMessage::Relay {
                from,
                target,
                payload,
            } => {
                self.handle_relay(from, target, payload).await;
            }

            RegistryMessage::MuteChanged { session_id, muted } => {
                self.handle_mute_changed(session_id, muted).await;
            }

            RegistryMessage::MembersOf {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.members_of(&room_id));
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    sessions: self.sessions.len(),
                    rooms: self.rooms.len(),
                });
            }
        }
    }

    /// Register a newly accepted connection.
    fn handle_connect(&mut self, session_id: SessionId, connection: ConnectionActorHandle) {
        if self.sessions.contains_key(&session_id) {
            warn!(
                target: "relay.actor.registry",
                session_id = %session_id,
                "Duplicate connect for live session, ignoring"
            );
            return;
        }

        self.sessions.insert(
            session_id,
            Session {
                display_name: None,
                rooms: HashSet::new(),
                connection,
                connected_at: chrono::Utc::now().timestamp(),
                audio_muted: false,
            },
        );
        self.metrics.session_connected();

        debug!(
            target: "relay.actor.registry",
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session connected"
        );
    }

    /// Handle a join: record membership, deliver the co-member snapshot
    /// to the joiner and broadcast the join to prior members, all in
    /// this single mailbox turn.
    async fn handle_join(
        &mut self,
        session_id: SessionId,
        room_id: RoomId,
        display_name: String,
    ) -> Result<MembershipSnapshot, RelayError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(RelayError::UnknownSession(session_id));
        }

        let mut room_is_new = false;
        let co_member_ids: Vec<SessionId> = {
            let members = self.rooms.entry(room_id.clone()).or_insert_with(|| {
                room_is_new = true;
                HashSet::new()
            });
            members.insert(session_id);
            members
                .iter()
                .copied()
                .filter(|id| *id != session_id)
                .collect()
        };

        if room_is_new {
            self.metrics.room_created();
            debug!(
                target: "relay.actor.registry",
                room_id = %room_id,
                "Room created"
            );
        }

        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.display_name = Some(display_name.clone());
            session.rooms.insert(room_id.clone());
        }

        let members: Vec<MemberInfo> = co_member_ids
            .iter()
            .filter_map(|id| {
                self.sessions.get(id).map(|session| MemberInfo {
                    session_id: *id,
                    display_name: session.display_name.clone().unwrap_or_default(),
                    audio_muted: session.audio_muted,
                })
            })
            .collect();

        // Snapshot to the joiner first, then the broadcast; both happen
        // before the next mailbox message is processed.
        if let Some(session) = self.sessions.get(&session_id) {
            let _ = session
                .connection
                .deliver(ServerMessage::ExistingMembers {
                    members: members.clone(),
                })
                .await;
        }

        let joined = ServerMessage::PeerJoined {
            session_id,
            display_name,
        };
        for member in &members {
            if let Some(other) = self.sessions.get(&member.session_id) {
                let _ = other.connection.deliver(joined.clone()).await;
            }
        }

        info!(
            target: "relay.actor.registry",
            room_id = %room_id,
            session_id = %session_id,
            room_members = members.len() + 1,
            "Session joined room"
        );

        Ok(MembershipSnapshot { room_id, members })
    }

    /// Handle an explicit single-room leave.
    async fn handle_leave(&mut self, session_id: SessionId, room_id: &RoomId) {
        let was_member = self
            .sessions
            .get_mut(&session_id)
            .is_some_and(|session| session.rooms.remove(room_id));
        if !was_member {
            return;
        }

        self.remove_from_room(session_id, room_id).await;

        info!(
            target: "relay.actor.registry",
            room_id = %room_id,
            session_id = %session_id,
            "Session left room"
        );
    }

    /// Handle a closed connection: evict the session from every room it
    /// belonged to and stop its connection actor.
    async fn handle_disconnect(&mut self, session_id: SessionId) {
        let Some(session) = self.sessions.remove(&session_id) else {
            // Never joined, or the disconnect raced an earlier eviction.
            return;
        };

        for room_id in &session.rooms {
            self.remove_from_room(session_id, room_id).await;
        }

        session.connection.cancel();
        self.metrics.session_disconnected();

        info!(
            target: "relay.actor.registry",
            session_id = %session_id,
            connected_seconds = chrono::Utc::now().timestamp() - session.connected_at,
            remaining_sessions = self.sessions.len(),
            "Session disconnected"
        );
    }

    /// Drop a session from one room's member set, broadcasting the
    /// leave to the remaining members and removing the room if empty.
    async fn remove_from_room(&mut self, session_id: SessionId, room_id: &RoomId) {
        let remaining: Vec<SessionId> = match self.rooms.get_mut(room_id) {
            Some(members) => {
                members.remove(&session_id);
                members.iter().copied().collect()
            }
            None => return,
        };

        if remaining.is_empty() {
            self.rooms.remove(room_id);
            self.metrics.room_removed();
            debug!(
                target: "relay.actor.registry",
                room_id = %room_id,
                "Room empty, removed"
            );
            return;
        }

        let left = ServerMessage::PeerLeft { session_id };
        for id in remaining {
            if let Some(other) = self.sessions.get(&id) {
                let _ = other.connection.deliver(left.clone()).await;
            }
        }
    }

    /// Forward a signal payload to its target, or drop it silently.
    async fn handle_relay(&mut self, from: SessionId, target: SessionId, payload: SignalPayload) {
        if !self.sessions.contains_key(&from) {
            warn!(
                target: "relay.actor.registry",
                from = %from,
                "Signal from unknown session, dropping"
            );
            return;
        }

        match self.sessions.get(&target) {
            Some(session) => {
                debug!(
                    target: "relay.actor.registry",
                    from = %from,
                    to = %target,
                    kind = payload.kind(),
                    "Relaying signal"
                );
                let _ = session
                    .connection
                    .deliver(ServerMessage::Signal { from, payload })
                    .await;
                self.metrics.signal_relayed();
            }
            None => {
                // Accepted race: the target disconnected while the
                // signal was in flight. The sender learns of the
                // absence via a peer-left event, never via an error.
                debug!(
                    target: "relay.actor.registry",
                    from = %from,
                    to = %target,
                    kind = payload.kind(),
                    "Relay target not connected, dropping signal"
                );
                self.metrics.signal_dropped();
            }
        }
    }

    /// Record a mute change and broadcast it to all co-members across
    /// every room the session is in, once per co-member.
    async fn handle_mute_changed(&mut self, session_id: SessionId, muted: bool) {
        let rooms: Vec<RoomId> = match self.sessions.get_mut(&session_id) {
            Some(session) => {
                session.audio_muted = muted;
                session.rooms.iter().cloned().collect()
            }
            None => return,
        };

        let update = ServerMessage::PeerMuteChanged { session_id, muted };
        let mut notified: HashSet<SessionId> = HashSet::new();
        for room_id in &rooms {
            if let Some(members) = self.rooms.get(room_id) {
                for id in members {
                    if *id != session_id && notified.insert(*id) {
                        if let Some(other) = self.sessions.get(id) {
                            let _ = other.connection.deliver(update.clone()).await;
                        }
                    }
                }
            }
        }
    }

    /// Current members of a room.
    fn members_of(&self, room_id: &RoomId) -> Vec<MemberInfo> {
        let Some(members) = self.rooms.get(room_id) else {
            return Vec::new();
        };

        members
            .iter()
            .filter_map(|id| {
                self.sessions.get(id).map(|session| MemberInfo {
                    session_id: *id,
                    display_name: session.display_name.clone().unwrap_or_default(),
                    audio_muted: session.audio_muted,
                })
            })
            .collect()
    }

    /// Cancel every connection on shutdown.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "relay.actor.registry",
            sessions = self.sessions.len(),
            rooms = self.rooms.len(),
            "Performing graceful shutdown"
        );

        for session in self.sessions.values() {
            session.connection.cancel();
        }
        self.sessions.clear();
        self.rooms.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::super::connection::ConnectionActor;
    use super::*;
    use axum::extract::ws;
    use std::time::Duration;
    use tokio_util::sync::PollSender;

    fn test_registry() -> (RoomRegistryHandle, Arc<RelayMetrics>) {
        let metrics = RelayMetrics::new();
        let handle = RoomRegistryHandle::new(Arc::clone(&metrics));
        (handle, metrics)
    }

    async fn connect_session(
        registry: &RoomRegistryHandle,
    ) -> (SessionId, mpsc::Receiver<ws::Message>) {
        let session_id = SessionId::new();
        let (tx, rx) = mpsc::channel(64);
        let (connection, _task) =
            ConnectionActor::spawn(session_id, PollSender::new(tx), registry.child_token());
        registry.connect(session_id, connection).await.unwrap();
        (session_id, rx)
    }

    async fn recv_msg(rx: &mut mpsc::Receiver<ws::Message>) -> ServerMessage {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed");
        match frame {
            ws::Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn assert_no_msg(rx: &mut mpsc::Receiver<ws::Message>) {
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "expected no message, got {result:?}");
    }

    #[tokio::test]
    async fn test_join_returns_snapshot_and_broadcasts() {
        let (registry, _metrics) = test_registry();
        let room = RoomId::new("main");

        let (alice, mut alice_rx) = connect_session(&registry).await;
        let snapshot = registry
            .join(alice, room.clone(), "alice".to_string())
            .await
            .unwrap();
        assert!(snapshot.members.is_empty());
        assert_eq!(
            recv_msg(&mut alice_rx).await,
            ServerMessage::ExistingMembers { members: vec![] }
        );

        let (bob, mut bob_rx) = connect_session(&registry).await;
        let snapshot = registry
            .join(bob, room.clone(), "bob".to_string())
            .await
            .unwrap();
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(snapshot.members[0].session_id, alice);
        assert_eq!(snapshot.members[0].display_name, "alice");

        // Bob's connection sees the same snapshot.
        assert_eq!(
            recv_msg(&mut bob_rx).await,
            ServerMessage::ExistingMembers {
                members: snapshot.members.clone()
            }
        );

        // Alice is told about Bob.
        assert_eq!(
            recv_msg(&mut alice_rx).await,
            ServerMessage::PeerJoined {
                session_id: bob,
                display_name: "bob".to_string()
            }
        );

        registry.cancel();
    }

    #[tokio::test]
    async fn test_repeat_join_updates_display_name_without_duplicating() {
        let (registry, _metrics) = test_registry();
        let room = RoomId::new("main");

        let (alice, _alice_rx) = connect_session(&registry).await;
        registry
            .join(alice, room.clone(), "alice".to_string())
            .await
            .unwrap();
        registry
            .join(alice, room.clone(), "alice2".to_string())
            .await
            .unwrap();

        let members = registry.members_of(room).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].display_name, "alice2");

        registry.cancel();
    }

    #[tokio::test]
    async fn test_join_without_connect_is_rejected() {
        let (registry, _metrics) = test_registry();

        let result = registry
            .join(SessionId::new(), RoomId::new("main"), "ghost".to_string())
            .await;
        assert!(matches!(result, Err(RelayError::UnknownSession(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_evicts_from_every_room() {
        let (registry, _metrics) = test_registry();
        let main = RoomId::new("main");
        let side = RoomId::new("side");

        let (alice, _alice_rx) = connect_session(&registry).await;
        let (bob, mut bob_rx) = connect_session(&registry).await;
        let (carol, mut carol_rx) = connect_session(&registry).await;

        registry
            .join(alice, main.clone(), "alice".to_string())
            .await
            .unwrap();
        registry
            .join(alice, side.clone(), "alice".to_string())
            .await
            .unwrap();
        registry
            .join(bob, main.clone(), "bob".to_string())
            .await
            .unwrap();
        registry
            .join(carol, side.clone(), "carol".to_string())
            .await
            .unwrap();

        // Drain the membership chatter from the joins.
        let _ = recv_msg(&mut bob_rx).await; // existing-members
        let _ = recv_msg(&mut carol_rx).await; // existing-members

        registry.disconnect(alice).await.unwrap();

        assert_eq!(
            recv_msg(&mut bob_rx).await,
            ServerMessage::PeerLeft { session_id: alice }
        );
        assert_eq!(
            recv_msg(&mut carol_rx).await,
            ServerMessage::PeerLeft { session_id: alice }
        );

        assert_eq!(registry.members_of(main).await.unwrap().len(), 1);
        assert_eq!(registry.members_of(side).await.unwrap().len(), 1);

        let status = registry.status().await.unwrap();
        assert_eq!(status.sessions, 2);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_unknown_session_is_noop() {
        let (registry, _metrics) = test_registry();

        let (alice, _alice_rx) = connect_session(&registry).await;
        registry
            .join(alice, RoomId::new("main"), "alice".to_string())
            .await
            .unwrap();

        registry.disconnect(SessionId::new()).await.unwrap();

        let status = registry.status().await.unwrap();
        assert_eq!(status.sessions, 1);
        assert_eq!(status.rooms, 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_room_removed_when_last_member_leaves() {
        let (registry, metrics) = test_registry();
        let room = RoomId::new("main");

        let (alice, _alice_rx) = connect_session(&registry).await;
        registry
            .join(alice, room.clone(), "alice".to_string())
            .await
            .unwrap();
        assert_eq!(registry.status().await.unwrap().rooms, 1);

        registry.leave(alice, room.clone()).await.unwrap();

        let status = registry.status().await.unwrap();
        assert_eq!(status.rooms, 0);
        assert_eq!(status.sessions, 1, "leaving a room keeps the session");
        assert_eq!(metrics.snapshot().rooms, 0);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_relay_delivers_to_target_only() {
        let (registry, metrics) = test_registry();
        let room = RoomId::new("main");

        let (alice, mut alice_rx) = connect_session(&registry).await;
        let (bob, mut bob_rx) = connect_session(&registry).await;
        registry
            .join(alice, room.clone(), "alice".to_string())
            .await
            .unwrap();
        registry
            .join(bob, room.clone(), "bob".to_string())
            .await
            .unwrap();
        let _ = recv_msg(&mut alice_rx).await; // existing-members
        let _ = recv_msg(&mut alice_rx).await; // peer-joined bob
        let _ = recv_msg(&mut bob_rx).await; // existing-members

        let payload = SignalPayload::Offer {
            sdp: "v=0 alice-offer".to_string(),
        };
        registry.relay(alice, bob, payload.clone()).await.unwrap();

        assert_eq!(
            recv_msg(&mut bob_rx).await,
            ServerMessage::Signal {
                from: alice,
                payload
            }
        );
        assert_no_msg(&mut alice_rx).await;
        assert_eq!(metrics.snapshot().signals_relayed, 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_relay_to_absent_target_is_silently_dropped() {
        let (registry, metrics) = test_registry();
        let room = RoomId::new("main");

        let (alice, mut alice_rx) = connect_session(&registry).await;
        let (bob, mut bob_rx) = connect_session(&registry).await;
        registry
            .join(alice, room.clone(), "alice".to_string())
            .await
            .unwrap();
        registry
            .join(bob, room.clone(), "bob".to_string())
            .await
            .unwrap();
        let _ = recv_msg(&mut alice_rx).await;
        let _ = recv_msg(&mut alice_rx).await;
        let _ = recv_msg(&mut bob_rx).await;

        // Relay to a session that was never connected: no error, and
        // nothing is delivered to anyone.
        let result = registry
            .relay(
                alice,
                SessionId::new(),
                SignalPayload::Answer {
                    sdp: "v=0 stray".to_string(),
                },
            )
            .await;
        assert!(result.is_ok());
        assert_no_msg(&mut alice_rx).await;
        assert_eq!(metrics.snapshot().signals_dropped, 1);

        // The sender's channel is unaffected; a later relay still works.
        let payload = SignalPayload::Offer {
            sdp: "v=0 still-works".to_string(),
        };
        registry.relay(alice, bob, payload.clone()).await.unwrap();
        assert_eq!(
            recv_msg(&mut bob_rx).await,
            ServerMessage::Signal {
                from: alice,
                payload
            }
        );

        registry.cancel();
    }

    #[tokio::test]
    async fn test_mute_change_reaches_co_members_and_late_joiners() {
        let (registry, _metrics) = test_registry();
        let room = RoomId::new("main");

        let (alice, mut alice_rx) = connect_session(&registry).await;
        let (bob, mut bob_rx) = connect_session(&registry).await;
        registry
            .join(alice, room.clone(), "alice".to_string())
            .await
            .unwrap();
        registry
            .join(bob, room.clone(), "bob".to_string())
            .await
            .unwrap();
        let _ = recv_msg(&mut alice_rx).await;
        let _ = recv_msg(&mut alice_rx).await;
        let _ = recv_msg(&mut bob_rx).await;

        registry.mute_changed(alice, true).await.unwrap();

        assert_eq!(
            recv_msg(&mut bob_rx).await,
            ServerMessage::PeerMuteChanged {
                session_id: alice,
                muted: true
            }
        );
        assert_no_msg(&mut alice_rx).await;

        // A late joiner sees the current flag in the snapshot.
        let (carol, _carol_rx) = connect_session(&registry).await;
        let snapshot = registry
            .join(carol, room, "carol".to_string())
            .await
            .unwrap();
        let alice_info = snapshot
            .members
            .iter()
            .find(|m| m.session_id == alice)
            .unwrap();
        assert!(alice_info.audio_muted);

        registry.cancel();
    }
}
