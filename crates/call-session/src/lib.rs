//! Parley Call Session
//!
//! Client-side session layer for multi-party calls: a
//! `SessionCoordinator` owns one `PeerSession` state machine per remote
//! participant and keeps that table converged with the server's
//! membership view, while the actual media work happens behind the
//! [`media::MediaEngine`] trait seam.
//!
//! # Architecture
//!
//! ```text
//! SignalingChannel (ws)          MediaEngine (host media stack)
//!        │  ServerMessage                │  EngineEvent
//!        ▼                               ▼
//! SessionCoordinator ── owns ──> PeerSession (one per remote)
//!        │                               │
//!        ▼  UiEvent                      ▼  offer/answer/candidates
//!      host UI                     back through the channel
//! ```
//!
//! Everything the coordinator owns is mutated from its single event
//! loop, so out-of-order delivery across independent connections is
//! handled by construction: peers are created lazily when an offer
//! beats the membership event, duplicate joins only rename, and
//! signals for departed peers are inert.
//!
//! # Modules
//!
//! - [`coordinator`] - Session coordinator actor and UI projections
//! - [`peer`] - Per-peer negotiation state machine
//! - [`media`] - Media engine trait seam
//! - [`transport`] - WebSocket signaling channel
//! - [`errors`] - Error types

pub mod coordinator;
pub mod errors;
pub mod media;
pub mod peer;
pub mod transport;

pub use coordinator::{
    CoordinatorSnapshot, PeerSnapshot, SessionCoordinator, SessionCoordinatorHandle, UiEvent,
};
pub use errors::SessionError;
pub use media::{EngineEvent, EngineEventKind, LocalMediaState, MediaEngine, MediaError, PeerMedia};
pub use peer::{NegotiationState, PeerRole, PeerSession};
pub use transport::SignalingChannel;
