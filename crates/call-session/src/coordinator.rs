//! `SessionCoordinator` - owner of the peer-session table.
//!
//! One coordinator per joined call. It is the client-side single-
//! threaded event boundary: membership events, relayed signals, engine
//! events and local commands all pass through one mailbox, so the peer
//! table and `LocalMediaState` are never touched concurrently.
//!
//! Responsibilities:
//! - keep the peer table converged with the server's membership view
//! - fix each peer's role exactly once (membership notice -> initiator,
//!   first inbound offer -> responder)
//! - fan local mute/camera changes out to every live peer
//! - replace a failed peer session once, then surface the failure
//! - project state changes to the host UI as [`UiEvent`]s

use crate::errors::SessionError;
use crate::media::{EngineEvent, EngineEventKind, LocalMediaState, MediaEngine};
use crate::peer::{NegotiationState, PeerRole, PeerSession};

use common::protocol::{ClientMessage, ServerMessage, SignalPayload};
use common::types::{RoomId, SessionId};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 256;

/// Buffer for engine events; sized so description calls that complete
/// while the mailbox is busy never block the engine.
const ENGINE_EVENT_BUFFER: usize = 256;

/// Messages handled by the `SessionCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A parsed message from the signaling channel.
    ServerEvent(ServerMessage),
    /// Ask the server to join a room.
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },
    /// Local mute toggle.
    SetAudioMuted { muted: bool },
    /// Local camera toggle.
    SetCameraEnabled { enabled: bool },
    /// Current coordinator state, for the host and tests.
    Snapshot {
        respond_to: oneshot::Sender<CoordinatorSnapshot>,
    },
}

/// State projection emitted to the host UI.
///
/// UI concerns are pure projections of coordinator state; the UI never
/// holds state of its own that the coordinator does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// The server assigned our session ID.
    SessionReady { session_id: SessionId },
    /// A peer session was created.
    PeerAdded {
        session_id: SessionId,
        display_name: String,
    },
    /// A known peer's display name changed.
    PeerRenamed {
        session_id: SessionId,
        display_name: String,
    },
    /// A peer's negotiation state changed.
    PeerStateChanged {
        session_id: SessionId,
        state: NegotiationState,
    },
    /// A peer's informational mute flag changed.
    PeerMuteChanged { session_id: SessionId, muted: bool },
    /// Remote media started flowing for a peer.
    RemoteTrackAdded { session_id: SessionId },
    /// A peer failed and will not be retried again.
    PeerFailed {
        session_id: SessionId,
        reason: String,
    },
    /// A peer left; its session and derived state are gone.
    PeerRemoved { session_id: SessionId },
}

/// Point-in-time view of one peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub remote: SessionId,
    pub role: PeerRole,
    pub state: NegotiationState,
    pub display_name: String,
    pub audio_muted: bool,
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Our own session ID, once the welcome arrived.
    pub local_session: Option<SessionId>,
    /// Current local media toggles.
    pub media: LocalMediaState,
    /// All live peer sessions.
    pub peers: Vec<PeerSnapshot>,
}

impl CoordinatorSnapshot {
    /// Find a peer by remote session ID.
    #[must_use]
    pub fn peer(&self, remote: SessionId) -> Option<&PeerSnapshot> {
        self.peers.iter().find(|p| p.remote == remote)
    }
}

/// Handle to a `SessionCoordinator`.
#[derive(Clone)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl SessionCoordinatorHandle {
    /// Feed one server event into the coordinator.
    pub async fn server_event(&self, event: ServerMessage) -> Result<(), SessionError> {
        self.sender
            .send(CoordinatorMessage::ServerEvent(event))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Ask the server to join a room.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        display_name: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.sender
            .send(CoordinatorMessage::JoinRoom {
                room_id,
                display_name: display_name.into(),
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Toggle the local audio mute.
    pub async fn set_audio_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.sender
            .send(CoordinatorMessage::SetAudioMuted { muted })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Toggle the local camera.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.sender
            .send(CoordinatorMessage::SetCameraEnabled { enabled })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Get a point-in-time view of the coordinator state.
    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Snapshot { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Hang up: cancel the coordinator and release every peer.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the coordinator is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator<E: MediaEngine> {
    /// Media engine (external collaborator behind the trait seam).
    engine: E,
    /// Message receiver.
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Engine event receiver.
    engine_events: mpsc::Receiver<EngineEvent>,
    /// Cloned into the engine at every peer creation.
    engine_events_tx: mpsc::Sender<EngineEvent>,
    /// Outbound client messages to the signaling channel.
    outbound: mpsc::Sender<ClientMessage>,
    /// State projections for the host UI.
    ui: mpsc::Sender<UiEvent>,
    /// Cancellation token.
    cancel_token: CancellationToken,
    /// Our own session ID, once the welcome arrived.
    local_session: Option<SessionId>,
    /// Local media toggles.
    media_state: LocalMediaState,
    /// Current outbound video track, attached to newly created peers.
    video_track: Option<E::Track>,
    /// Peer sessions by remote session ID.
    peers: HashMap<SessionId, PeerSession<E::Peer>>,
    /// Peers that left; signals from them are inert until they rejoin.
    departed: HashSet<SessionId>,
}

impl<E: MediaEngine> SessionCoordinator<E> {
    /// Spawn a new coordinator.
    ///
    /// `outbound` is drained by the signaling channel; `ui` receives
    /// state projections for the host.
    pub fn spawn(
        engine: E,
        outbound: mpsc::Sender<ClientMessage>,
        ui: mpsc::Sender<UiEvent>,
    ) -> (SessionCoordinatorHandle, JoinHandle<()>)
    where
        E::Peer: Sync,
        E::Track: Sync,
    {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let (engine_events_tx, engine_events) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let cancel_token = CancellationToken::new();

        let coordinator = Self {
            engine,
            receiver,
            engine_events,
            engine_events_tx,
            outbound,
            ui,
            cancel_token: cancel_token.clone(),
            local_session: None,
            media_state: LocalMediaState::default(),
            video_track: None,
            peers: HashMap::new(),
            departed: HashSet::new(),
        };

        let task_handle = tokio::spawn(coordinator.run());

        let handle = SessionCoordinatorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the coordinator event loop.
    async fn run(mut self) {
        info!(target: "call.coordinator", "SessionCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "call.coordinator",
                        peers = self.peers.len(),
                        "SessionCoordinator cancelled, releasing peers"
                    );
                    self.close_all_peers();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "call.coordinator",
                                "SessionCoordinator channel closed, exiting"
                            );
                            self.close_all_peers();
                            break;
                        }
                    }
                }

                event = self.engine_events.recv() => {
                    if let Some(event) = event {
                        self.handle_engine_event(event).await;
                    }
                }
            }
        }

        info!(target: "call.coordinator", "SessionCoordinator stopped");
    }

    /// Handle a single mailbox message.
    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::ServerEvent(event) => self.handle_server_event(event).await,

            CoordinatorMessage::JoinRoom {
                room_id,
                display_name,
            } => {
                info!(target: "call.coordinator", room_id = %room_id, "Joining room");
                let _ = self
                    .outbound
                    .send(ClientMessage::JoinRoom {
                        room_id,
                        display_name,
                    })
                    .await;
            }

            CoordinatorMessage::SetAudioMuted { muted } => {
                self.handle_set_audio_muted(muted).await;
            }

            CoordinatorMessage::SetCameraEnabled { enabled } => {
                self.handle_set_camera_enabled(enabled).await;
            }

            CoordinatorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    /// Handle one membership or signal event from the server.
    async fn handle_server_event(&mut self, event: ServerMessage) {
        match event {
            ServerMessage::Welcome { session_id } => {
                info!(target: "call.coordinator", session_id = %session_id, "Session established");
                self.local_session = Some(session_id);
                self.emit_ui(UiEvent::SessionReady { session_id }).await;
            }

            ServerMessage::ExistingMembers { members } => {
                debug!(
                    target: "call.coordinator",
                    members = members.len(),
                    "Existing members received"
                );
                for member in members {
                    self.departed.remove(&member.session_id);
                    let created = self
                        .ensure_peer(
                            member.session_id,
                            Some(member.display_name),
                            PeerRole::Initiator,
                        )
                        .await;
                    if created {
                        if let Some(peer) = self.peers.get_mut(&member.session_id) {
                            peer.set_remote_audio_muted(member.audio_muted);
                        }
                    }
                }
            }

            ServerMessage::PeerJoined {
                session_id,
                display_name,
            } => {
                self.departed.remove(&session_id);
                if let Some(peer) = self.peers.get_mut(&session_id) {
                    // A signal beat the membership event, so the session
                    // already exists; only the display name is updated.
                    peer.set_display_name(display_name.clone());
                    self.emit_ui(UiEvent::PeerRenamed {
                        session_id,
                        display_name,
                    })
                    .await;
                } else {
                    self.ensure_peer(session_id, Some(display_name), PeerRole::Initiator)
                        .await;
                }
            }

            ServerMessage::Signal { from, payload } => {
                self.handle_inbound_signal(from, payload).await;
            }

            ServerMessage::PeerLeft { session_id } => {
                self.remove_peer(session_id).await;
            }

            ServerMessage::PeerMuteChanged { session_id, muted } => {
                if let Some(peer) = self.peers.get_mut(&session_id) {
                    peer.set_remote_audio_muted(muted);
                    self.emit_ui(UiEvent::PeerMuteChanged { session_id, muted })
                        .await;
                }
            }
        }
    }

    /// Route one relayed signal to its peer session, lazily creating a
    /// responder for a first-contact offer.
    async fn handle_inbound_signal(&mut self, from: SessionId, payload: SignalPayload) {
        if self.departed.contains(&from) {
            debug!(
                target: "call.coordinator",
                from = %from,
                kind = payload.kind(),
                "Signal from departed peer, dropping"
            );
            return;
        }

        if !self.peers.contains_key(&from) {
            // Relay order may put a signal ahead of the membership
            // event. Lazy creation applies to offers only: a stray
            // candidate or answer never creates a session.
            if matches!(payload, SignalPayload::Offer { .. }) {
                if !self.ensure_peer(from, None, PeerRole::Responder).await {
                    return;
                }
            } else {
                warn!(
                    target: "call.coordinator",
                    from = %from,
                    kind = payload.kind(),
                    "Signal for unknown peer, dropping"
                );
                return;
            }
        }

        let Some(peer) = self.peers.get_mut(&from) else {
            return;
        };
        let before = peer.state();
        let result = peer.handle_signal(payload).await;
        let after = peer.state();

        match result {
            Ok(()) => {
                if after != before {
                    self.emit_ui(UiEvent::PeerStateChanged {
                        session_id: from,
                        state: after,
                    })
                    .await;
                }
            }
            Err(e) => self.fail_peer(from, e.to_string()).await,
        }
    }

    /// Handle one event from the media engine.
    async fn handle_engine_event(&mut self, event: EngineEvent) {
        let EngineEvent { remote, kind } = event;

        if !self.peers.contains_key(&remote) {
            // A settled operation of a peer that is already gone; the
            // peer-left teardown cancels anything still in flight.
            debug!(
                target: "call.coordinator",
                remote = %remote,
                "Engine event for unknown peer, dropping"
            );
            return;
        }

        match kind {
            EngineEventKind::NegotiationNeeded => {
                let Some(peer) = self.peers.get_mut(&remote) else {
                    return;
                };
                let before = peer.state();
                let result = peer.begin_negotiation().await;
                let after = peer.state();
                match result {
                    Ok(()) => {
                        if after != before {
                            self.emit_ui(UiEvent::PeerStateChanged {
                                session_id: remote,
                                state: after,
                            })
                            .await;
                        }
                    }
                    Err(e) => self.fail_peer(remote, e.to_string()).await,
                }
            }

            EngineEventKind::IceCandidate(candidate) => {
                if let Some(peer) = self.peers.get(&remote) {
                    peer.send_candidate(candidate).await;
                }
            }

            EngineEventKind::TrackAdded => {
                self.emit_ui(UiEvent::RemoteTrackAdded { session_id: remote })
                    .await;
            }

            EngineEventKind::ConnectionFailed { reason } => {
                self.fail_peer(remote, reason).await;
            }
        }
    }

    /// Create a peer session if none exists. Returns whether one was
    /// created. The role is fixed here, exactly once per remote.
    async fn ensure_peer(
        &mut self,
        remote: SessionId,
        display_name: Option<String>,
        role: PeerRole,
    ) -> bool {
        if self.peers.contains_key(&remote) {
            return false;
        }

        let media = match self
            .engine
            .create_peer(remote, self.engine_events_tx.clone())
            .await
        {
            Ok(media) => media,
            Err(e) => {
                error!(
                    target: "call.coordinator",
                    remote = %remote,
                    error = %e,
                    "Media engine refused to create peer"
                );
                self.emit_ui(UiEvent::PeerFailed {
                    session_id: remote,
                    reason: e.to_string(),
                })
                .await;
                return false;
            }
        };

        let display_name = display_name.unwrap_or_default();
        let mut peer = PeerSession::new(
            remote,
            role,
            display_name.clone(),
            media,
            self.outbound.clone(),
        );

        // New peers see the current local media state, never a stale one.
        peer.set_audio_enabled(!self.media_state.audio_muted);
        if let Some(track) = self.video_track.clone() {
            if let Err(e) = peer.replace_video_track(track).await {
                warn!(
                    target: "call.coordinator",
                    remote = %remote,
                    error = %e,
                    "Failed to attach video track to new peer"
                );
            }
        }

        info!(
            target: "call.coordinator",
            remote = %remote,
            role = role.as_str(),
            total_peers = self.peers.len() + 1,
            "Peer session created"
        );

        self.peers.insert(remote, peer);
        self.emit_ui(UiEvent::PeerAdded {
            session_id: remote,
            display_name,
        })
        .await;
        true
    }

    /// Tear a peer down after a leave event: release media, tombstone
    /// the identifier so stray in-flight signals are dropped.
    async fn remove_peer(&mut self, session_id: SessionId) {
        self.departed.insert(session_id);

        let Some(mut peer) = self.peers.remove(&session_id) else {
            return;
        };
        peer.close();

        info!(
            target: "call.coordinator",
            remote = %session_id,
            remaining_peers = self.peers.len(),
            "Peer left, session removed"
        );

        self.emit_ui(UiEvent::PeerRemoved { session_id }).await;
    }

    /// Failure path: tear down and recreate the peer exactly once; a
    /// second failure is surfaced and not retried.
    async fn fail_peer(&mut self, remote: SessionId, reason: String) {
        let Some(mut peer) = self.peers.remove(&remote) else {
            return;
        };

        if peer.recreated() {
            warn!(
                target: "call.coordinator",
                remote = %remote,
                reason = %reason,
                "Peer failed again after recreate, giving up"
            );
            peer.fail();
            self.peers.insert(remote, peer);
            self.emit_ui(UiEvent::PeerFailed {
                session_id: remote,
                reason,
            })
            .await;
            return;
        }

        warn!(
            target: "call.coordinator",
            remote = %remote,
            reason = %reason,
            "Peer failed, tearing down and recreating once"
        );

        let role = peer.role();
        let display_name = peer.display_name().to_string();
        let remote_muted = peer.remote_audio_muted();
        peer.close();
        drop(peer);

        match self
            .engine
            .create_peer(remote, self.engine_events_tx.clone())
            .await
        {
            Ok(media) => {
                let mut fresh =
                    PeerSession::new(remote, role, display_name, media, self.outbound.clone());
                fresh.mark_recreated();
                fresh.set_remote_audio_muted(remote_muted);
                fresh.set_audio_enabled(!self.media_state.audio_muted);
                if let Some(track) = self.video_track.clone() {
                    if let Err(e) = fresh.replace_video_track(track).await {
                        warn!(
                            target: "call.coordinator",
                            remote = %remote,
                            error = %e,
                            "Failed to attach video track to recreated peer"
                        );
                    }
                }
                self.peers.insert(remote, fresh);
                self.emit_ui(UiEvent::PeerStateChanged {
                    session_id: remote,
                    state: NegotiationState::Idle,
                })
                .await;
            }
            Err(e) => {
                error!(
                    target: "call.coordinator",
                    remote = %remote,
                    error = %e,
                    "Failed to recreate peer"
                );
                self.emit_ui(UiEvent::PeerFailed {
                    session_id: remote,
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    /// Apply a local mute toggle to every live peer and announce it.
    async fn handle_set_audio_muted(&mut self, muted: bool) {
        if self.media_state.audio_muted == muted {
            return;
        }
        self.media_state.audio_muted = muted;

        for peer in self.peers.values_mut() {
            peer.set_audio_enabled(!muted);
        }

        let _ = self
            .outbound
            .send(ClientMessage::MuteChanged { muted })
            .await;

        info!(target: "call.coordinator", muted = muted, "Local mute changed");
    }

    /// Toggle the local camera. Re-enabling captures a fresh track and
    /// replaces it on every live peer without renegotiating; a per-peer
    /// failure stays scoped to that peer.
    async fn handle_set_camera_enabled(&mut self, enabled: bool) {
        if self.media_state.video_enabled == enabled {
            return;
        }

        if enabled {
            let track = match self.engine.capture_video_track().await {
                Ok(track) => track,
                Err(e) => {
                    error!(
                        target: "call.coordinator",
                        error = %e,
                        "Video capture failed, camera stays off"
                    );
                    return;
                }
            };

            for peer in self.peers.values_mut() {
                let remote = peer.remote();
                if let Err(e) = peer.replace_video_track(track.clone()).await {
                    warn!(
                        target: "call.coordinator",
                        remote = %remote,
                        error = %e,
                        "Track replacement failed"
                    );
                }
            }

            self.video_track = Some(track);
            self.media_state.video_enabled = true;
            info!(target: "call.coordinator", "Camera enabled");
        } else {
            // Full stop of the capture hardware; senders go dark
            // without any renegotiation.
            self.engine.stop_video_capture().await;
            self.video_track = None;
            self.media_state.video_enabled = false;
            info!(target: "call.coordinator", "Camera disabled");
        }
    }

    /// Build a point-in-time snapshot.
    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            local_session: self.local_session,
            media: self.media_state,
            peers: self
                .peers
                .values()
                .map(|peer| PeerSnapshot {
                    remote: peer.remote(),
                    role: peer.role(),
                    state: peer.state(),
                    display_name: peer.display_name().to_string(),
                    audio_muted: peer.remote_audio_muted(),
                })
                .collect(),
        }
    }

    /// Release every peer session.
    fn close_all_peers(&mut self) {
        for peer in self.peers.values_mut() {
            peer.close();
        }
    }

    async fn emit_ui(&self, event: UiEvent) {
        let _ = self.ui.send(event).await;
    }
}
