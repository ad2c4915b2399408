//! Media engine seam.
//!
//! Actual capture, encoding and transport belong to the host's
//! real-time media stack; the session layer only drives negotiation.
//! The engine is modeled as two traits: [`MediaEngine`] mints one
//! [`PeerMedia`] per remote participant, and each `PeerMedia` performs
//! the asynchronous description/candidate operations for that pair.
//! The engine reports back through an [`EngineEvent`] channel handed
//! over at peer creation.

use async_trait::async_trait;
use common::protocol::IceCandidate;
use common::types::SessionId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Process-local media toggles, mutated only by local user action and
/// applied to every live peer session on change.
///
/// The camera starts off; audio starts live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalMediaState {
    /// Whether the outbound audio track is muted.
    pub audio_muted: bool,
    /// Whether an outbound video track is being captured.
    pub video_enabled: bool,
}

/// Media engine failure.
///
/// Failures are scoped to a single peer pair; candidate rejections in
/// particular are an accepted race, logged and ignored.
#[derive(Debug, Error)]
pub enum MediaError {
    /// A session description was rejected or could not be produced.
    #[error("Media engine rejected description: {0}")]
    Description(String),

    /// A candidate was rejected (e.g., no remote description yet).
    #[error("Media engine rejected candidate: {0}")]
    Candidate(String),

    /// Local capture failed.
    #[error("Media capture failed: {0}")]
    Capture(String),
}

/// Event reported by the media engine for one peer pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    /// The remote participant the event belongs to.
    pub remote: SessionId,
    pub kind: EngineEventKind,
}

/// What the engine is reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    /// The pair needs (re)negotiation: initial setup or a track change.
    NegotiationNeeded,
    /// A local candidate to relay to the remote side.
    IceCandidate(IceCandidate),
    /// Remote media started flowing; a pure UI signal.
    TrackAdded,
    /// The underlying connection failed.
    ConnectionFailed { reason: String },
}

/// Per-peer media operations.
///
/// One instance per remote participant, created by [`MediaEngine`] and
/// owned by the peer session. Dropping or closing it releases the
/// underlying connection and cancels anything in flight.
#[async_trait]
pub trait PeerMedia: Send + 'static {
    /// Opaque outbound video track handle.
    type Track: Clone + Send + 'static;

    /// Create a local offer and set it as the local description.
    async fn create_offer(&mut self) -> Result<String, MediaError>;

    /// Apply a remote offer and produce the local answer (set locally).
    async fn create_answer(&mut self, remote_offer: &str) -> Result<String, MediaError>;

    /// Apply the remote answer to a previously created offer.
    async fn apply_answer(&mut self, remote_answer: &str) -> Result<(), MediaError>;

    /// Apply a remote candidate.
    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError>;

    /// Toggle the outbound audio track's enabled flag.
    fn set_audio_enabled(&mut self, enabled: bool);

    /// Swap the outbound video track in place, without renegotiation.
    async fn replace_video_track(&mut self, track: Self::Track) -> Result<(), MediaError>;

    /// Release the connection and all its tracks.
    fn close(&mut self);
}

/// Factory for per-peer media plus local capture control.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Opaque outbound video track handle.
    type Track: Clone + Send + 'static;
    /// Per-peer media type.
    type Peer: PeerMedia<Track = Self::Track>;

    /// Create the media side of a new peer pair. Events for the pair
    /// are reported through `events`.
    async fn create_peer(
        &self,
        remote: SessionId,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Self::Peer, MediaError>;

    /// Start (or restart) video capture and hand back the track.
    async fn capture_video_track(&self) -> Result<Self::Track, MediaError>;

    /// Stop video capture hardware.
    async fn stop_video_capture(&self);
}
