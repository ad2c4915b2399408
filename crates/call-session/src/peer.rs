//! Per-peer negotiation state machine.
//!
//! One `PeerSession` per remote participant, owned exclusively by the
//! session coordinator. The machine drives the offer/answer/candidate
//! exchange for its pair to a connected state and tolerates the races
//! the relay permits: candidates outrunning descriptions are buffered,
//! duplicate or glare offers are processed as fresh renegotiations,
//! and anything arriving after close is ignored.

use crate::media::{MediaError, PeerMedia};

use common::protocol::{ClientMessage, IceCandidate, SignalPayload};
use common::types::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which side of the pair initiates negotiation.
///
/// Decided exactly once, by whichever event is observed first for the
/// remote identifier: a membership notice makes an initiator, an
/// inbound offer makes a responder. The role never flips afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Offers proactively whenever the engine asks for negotiation.
    Initiator,
    /// Answers inbound offers; never offers spontaneously.
    Responder,
}

impl PeerRole {
    /// Role as a string for log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PeerRole::Initiator => "initiator",
            PeerRole::Responder => "responder",
        }
    }
}

/// Negotiation progress for one peer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No exchange started yet.
    Idle,
    /// A local offer is in flight, waiting for the answer.
    Offering,
    /// A remote offer is being answered. Held only across the
    /// synchronous answer turn; the machine lands in `Connected` in the
    /// same call.
    Answering,
    /// Descriptions are applied on both sides; media may flow.
    Connected,
    /// Torn down by a peer-left event or local hangup. Terminal.
    Closed,
    /// The media engine gave up on this pair. Terminal for the machine;
    /// the coordinator may replace the whole session once.
    Failed,
}

impl NegotiationState {
    /// State as a string for log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::Answering => "answering",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
            NegotiationState::Failed => "failed",
        }
    }

    /// Whether the machine still processes signals.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }
}

/// State machine for one remote participant.
pub struct PeerSession<P: PeerMedia> {
    /// Remote participant this session negotiates with.
    remote: SessionId,
    /// Fixed negotiation role.
    role: PeerRole,
    /// Current negotiation state.
    state: NegotiationState,
    /// Display name from the most recent membership event.
    display_name: String,
    /// Remote's informational mute flag.
    remote_audio_muted: bool,
    /// Engine-side half of the pair.
    media: P,
    /// Candidates that arrived before a remote description.
    pending_candidates: Vec<IceCandidate>,
    /// Whether a remote description has been applied.
    remote_description_set: bool,
    /// Whether this session is the one-shot replacement after a failure.
    recreated: bool,
    /// Outbound signaling messages to the server.
    outbound: mpsc::Sender<ClientMessage>,
}

impl<P: PeerMedia> PeerSession<P> {
    /// Create a new peer session in `Idle`.
    pub fn new(
        remote: SessionId,
        role: PeerRole,
        display_name: String,
        media: P,
        outbound: mpsc::Sender<ClientMessage>,
    ) -> Self {
        Self {
            remote,
            role,
            state: NegotiationState::Idle,
            display_name,
            remote_audio_muted: false,
            media,
            pending_candidates: Vec::new(),
            remote_description_set: false,
            recreated: false,
            outbound,
        }
    }

    /// The remote participant's session ID.
    #[must_use]
    pub fn remote(&self) -> SessionId {
        self.remote
    }

    /// The fixed negotiation role.
    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Current negotiation state.
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Current display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Update the display name (repeat joins may rename).
    pub fn set_display_name(&mut self, display_name: String) {
        self.display_name = display_name;
    }

    /// Remote's informational mute flag.
    #[must_use]
    pub fn remote_audio_muted(&self) -> bool {
        self.remote_audio_muted
    }

    /// Record the remote's informational mute flag.
    pub fn set_remote_audio_muted(&mut self, muted: bool) {
        self.remote_audio_muted = muted;
    }

    /// Whether this session already used its one replacement.
    #[must_use]
    pub fn recreated(&self) -> bool {
        self.recreated
    }

    /// Mark this session as the one-shot replacement after a failure.
    pub fn mark_recreated(&mut self) {
        self.recreated = true;
    }

    /// React to the engine's negotiation-needed signal.
    ///
    /// Only initiators offer; a responder observing the event ignores
    /// it, which is what keeps role assignment meaningful. An offer
    /// already in flight is not duplicated.
    pub async fn begin_negotiation(&mut self) -> Result<(), MediaError> {
        if self.role == PeerRole::Responder {
            debug!(
                target: "call.peer",
                remote = %self.remote,
                "Responder ignores negotiation-needed"
            );
            return Ok(());
        }
        if !self.state.is_live() {
            debug!(
                target: "call.peer",
                remote = %self.remote,
                state = self.state.as_str(),
                "Ignoring negotiation-needed for finished session"
            );
            return Ok(());
        }
        if matches!(
            self.state,
            NegotiationState::Offering | NegotiationState::Answering
        ) {
            debug!(
                target: "call.peer",
                remote = %self.remote,
                "Negotiation already in flight"
            );
            return Ok(());
        }

        let sdp = self.media.create_offer().await?;
        self.send_signal(SignalPayload::Offer { sdp }).await;
        self.state = NegotiationState::Offering;

        debug!(target: "call.peer", remote = %self.remote, "Offer sent");
        Ok(())
    }

    /// Process one inbound signal for this pair.
    ///
    /// Description failures bubble up so the coordinator can run its
    /// teardown-and-recreate path; candidate rejections are logged and
    /// absorbed here.
    pub async fn handle_signal(&mut self, payload: SignalPayload) -> Result<(), MediaError> {
        if !self.state.is_live() {
            debug!(
                target: "call.peer",
                remote = %self.remote,
                state = self.state.as_str(),
                kind = payload.kind(),
                "Ignoring signal for finished session"
            );
            return Ok(());
        }

        match payload {
            SignalPayload::Offer { sdp } => self.handle_offer(sdp).await,
            SignalPayload::Answer { sdp } => self.handle_answer(sdp).await,
            SignalPayload::Candidate { candidate } => {
                self.handle_candidate(candidate).await;
                Ok(())
            }
        }
    }

    /// Relay a locally gathered candidate to the remote side.
    pub async fn send_candidate(&self, candidate: IceCandidate) {
        if !self.state.is_live() {
            return;
        }
        self.send_signal(SignalPayload::Candidate { candidate })
            .await;
    }

    /// Apply the local audio-mute flag to the outbound track.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.media.set_audio_enabled(enabled);
    }

    /// Swap the outbound video track without renegotiating.
    pub async fn replace_video_track(&mut self, track: P::Track) -> Result<(), MediaError> {
        self.media.replace_video_track(track).await
    }

    /// Tear the session down; later signals become no-ops.
    pub fn close(&mut self) {
        self.media.close();
        self.state = NegotiationState::Closed;
    }

    /// Mark the session failed after the engine gave up on it.
    pub fn fail(&mut self) {
        self.media.close();
        self.state = NegotiationState::Failed;
    }

    async fn handle_offer(&mut self, sdp: String) -> Result<(), MediaError> {
        match self.state {
            NegotiationState::Offering => {
                // Glare: both sides offered at once. Process the remote
                // offer as a fresh renegotiation instead of erroring.
                debug!(
                    target: "call.peer",
                    remote = %self.remote,
                    "Offer received while offering (glare), answering it"
                );
            }
            NegotiationState::Connected => {
                // Renegotiation from an already-connected peer, e.g. a
                // track change on the far side.
                debug!(
                    target: "call.peer",
                    remote = %self.remote,
                    "Renegotiation offer from connected peer"
                );
            }
            _ => {}
        }

        self.state = NegotiationState::Answering;
        let answer = self.media.create_answer(&sdp).await?;
        self.remote_description_set = true;
        self.flush_candidates().await;
        self.send_signal(SignalPayload::Answer { sdp: answer }).await;
        self.state = NegotiationState::Connected;

        debug!(target: "call.peer", remote = %self.remote, "Answer sent");
        Ok(())
    }

    async fn handle_answer(&mut self, sdp: String) -> Result<(), MediaError> {
        if self.state != NegotiationState::Offering {
            warn!(
                target: "call.peer",
                remote = %self.remote,
                state = self.state.as_str(),
                "Answer with no pending offer, ignoring"
            );
            return Ok(());
        }

        self.media.apply_answer(&sdp).await?;
        self.remote_description_set = true;
        self.flush_candidates().await;
        self.state = NegotiationState::Connected;

        debug!(target: "call.peer", remote = %self.remote, "Answer applied");
        Ok(())
    }

    async fn handle_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_description_set {
            // Accepted race: relay order lets candidates outrun the
            // description they belong to.
            debug!(
                target: "call.peer",
                remote = %self.remote,
                "Buffering candidate until a remote description is set"
            );
            self.pending_candidates.push(candidate);
            return;
        }

        if let Err(e) = self.media.add_ice_candidate(&candidate).await {
            warn!(
                target: "call.peer",
                remote = %self.remote,
                error = %e,
                "Candidate rejected by media engine"
            );
        }
    }

    async fn flush_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        debug!(
            target: "call.peer",
            remote = %self.remote,
            count = self.pending_candidates.len(),
            "Applying buffered candidates"
        );
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.media.add_ice_candidate(&candidate).await {
                warn!(
                    target: "call.peer",
                    remote = %self.remote,
                    error = %e,
                    "Buffered candidate rejected by media engine"
                );
            }
        }
    }

    async fn send_signal(&self, payload: SignalPayload) {
        let _ = self
            .outbound
            .send(ClientMessage::Signal {
                target: self.remote,
                payload,
            })
            .await;
    }
}
