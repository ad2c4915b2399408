//! # Call Session Test Utilities
//!
//! Mock media engine for isolated `call-session` testing without a real
//! real-time media stack.
//!
//! The mock mirrors the behavior the session layer depends on:
//! - `create_peer` emits a `NegotiationNeeded` event (initial track
//!   setup), unless auto-negotiation is disabled
//! - descriptions and candidates are recorded per peer in an
//!   inspectable [`MockPeerState`]
//! - candidates are rejected while no remote description is set
//! - failure knobs make offers, answers, candidates or capture fail
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cs_test_utils::MockMediaEngine;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockMediaEngine::new().with_failing_offers();
//!     let (handle, _task) = SessionCoordinator::spawn(engine.clone(), outbound, ui);
//!     // ...drive the coordinator, then inspect:
//!     let state = engine.peer_state(remote).unwrap();
//!     assert!(state.lock().unwrap().closed);
//! }
//! ```

use async_trait::async_trait;
use call_session::media::{EngineEvent, EngineEventKind, MediaEngine, MediaError, PeerMedia};
use common::protocol::IceCandidate;
use common::types::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Recorded per-peer media activity, shared with tests.
#[derive(Debug, Default)]
pub struct MockPeerState {
    /// Offers produced by `create_offer`.
    pub offers_created: u32,
    /// Answers produced by `create_answer`.
    pub answers_created: u32,
    /// Remote offers applied via `create_answer`.
    pub remote_offers: Vec<String>,
    /// Remote answers applied via `apply_answer`.
    pub applied_answers: Vec<String>,
    /// Candidates accepted by `add_ice_candidate`.
    pub candidates: Vec<IceCandidate>,
    /// Outbound audio track enabled flag.
    pub audio_enabled: bool,
    /// Video tracks attached via `replace_video_track`.
    pub video_tracks: Vec<u32>,
    /// Whether a remote description has been applied.
    pub remote_description_set: bool,
    /// Whether the peer was closed.
    pub closed: bool,
}

#[derive(Debug, Default)]
struct EngineInner {
    peers: HashMap<SessionId, Arc<Mutex<MockPeerState>>>,
    event_senders: HashMap<SessionId, mpsc::Sender<EngineEvent>>,
    create_peer_calls: u32,
    captures: u32,
    video_capturing: bool,
    auto_negotiate: bool,
    fail_offers: bool,
    fail_answers: bool,
    fail_candidates: bool,
    fail_capture: bool,
}

/// Mock media engine. Clone freely; all clones share state.
#[derive(Debug, Clone)]
pub struct MockMediaEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaEngine {
    /// Create a mock engine that signals negotiation-needed whenever a
    /// peer is created (simulating initial track setup).
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineInner {
                auto_negotiate: true,
                ..EngineInner::default()
            })),
        }
    }

    /// Disable the automatic negotiation-needed event on peer creation.
    #[must_use]
    pub fn without_auto_negotiate(self) -> Self {
        self.inner.lock().unwrap().auto_negotiate = false;
        self
    }

    /// Make every `create_offer` call fail.
    #[must_use]
    pub fn with_failing_offers(self) -> Self {
        self.inner.lock().unwrap().fail_offers = true;
        self
    }

    /// Make every `create_answer` call fail.
    #[must_use]
    pub fn with_failing_answers(self) -> Self {
        self.inner.lock().unwrap().fail_answers = true;
        self
    }

    /// Make every `add_ice_candidate` call fail.
    #[must_use]
    pub fn with_failing_candidates(self) -> Self {
        self.inner.lock().unwrap().fail_candidates = true;
        self
    }

    /// Make `capture_video_track` fail.
    #[must_use]
    pub fn with_failing_capture(self) -> Self {
        self.inner.lock().unwrap().fail_capture = true;
        self
    }

    /// Toggle offer failures at runtime (e.g. to let a recreated peer
    /// succeed after the first one failed).
    pub fn set_fail_offers(&self, fail: bool) {
        self.inner.lock().unwrap().fail_offers = fail;
    }

    /// Recorded state for a peer, if one was created. Returns the most
    /// recent peer for the identifier if it was recreated.
    #[must_use]
    pub fn peer_state(&self, remote: SessionId) -> Option<Arc<Mutex<MockPeerState>>> {
        self.inner.lock().unwrap().peers.get(&remote).cloned()
    }

    /// Total `create_peer` calls (recreations included).
    #[must_use]
    pub fn create_peer_calls(&self) -> u32 {
        self.inner.lock().unwrap().create_peer_calls
    }

    /// Total `capture_video_track` calls.
    #[must_use]
    pub fn captures(&self) -> u32 {
        self.inner.lock().unwrap().captures
    }

    /// Whether video capture is currently running.
    #[must_use]
    pub fn is_video_capturing(&self) -> bool {
        self.inner.lock().unwrap().video_capturing
    }

    /// Inject an engine event for a peer, as the real engine would
    /// (candidate gathered, remote track, connection failure).
    pub async fn emit(&self, remote: SessionId, kind: EngineEventKind) {
        let sender = self
            .inner
            .lock()
            .unwrap()
            .event_senders
            .get(&remote)
            .cloned()
            .expect("no peer created for this session");
        sender
            .send(EngineEvent { remote, kind })
            .await
            .expect("engine event channel closed");
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    type Track = u32;
    type Peer = MockPeerMedia;

    async fn create_peer(
        &self,
        remote: SessionId,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<MockPeerMedia, MediaError> {
        let (state, auto_negotiate) = {
            let mut inner = self.inner.lock().unwrap();
            inner.create_peer_calls += 1;
            let state = Arc::new(Mutex::new(MockPeerState {
                audio_enabled: true,
                ..MockPeerState::default()
            }));
            inner.peers.insert(remote, Arc::clone(&state));
            inner.event_senders.insert(remote, events.clone());
            (state, inner.auto_negotiate)
        };

        if auto_negotiate {
            let _ = events
                .send(EngineEvent {
                    remote,
                    kind: EngineEventKind::NegotiationNeeded,
                })
                .await;
        }

        Ok(MockPeerMedia {
            remote,
            state,
            engine: Arc::clone(&self.inner),
        })
    }

    async fn capture_video_track(&self) -> Result<u32, MediaError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_capture {
            return Err(MediaError::Capture("mock capture failure".to_string()));
        }
        inner.captures += 1;
        inner.video_capturing = true;
        Ok(inner.captures)
    }

    async fn stop_video_capture(&self) {
        self.inner.lock().unwrap().video_capturing = false;
    }
}

/// Mock per-peer media handle.
#[derive(Debug)]
pub struct MockPeerMedia {
    remote: SessionId,
    state: Arc<Mutex<MockPeerState>>,
    engine: Arc<Mutex<EngineInner>>,
}

#[async_trait]
impl PeerMedia for MockPeerMedia {
    type Track = u32;

    async fn create_offer(&mut self) -> Result<String, MediaError> {
        if self.engine.lock().unwrap().fail_offers {
            return Err(MediaError::Description("mock offer failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(MediaError::Description("peer is closed".to_string()));
        }
        state.offers_created += 1;
        Ok(format!("v=0 offer-{}-{}", self.remote, state.offers_created))
    }

    async fn create_answer(&mut self, remote_offer: &str) -> Result<String, MediaError> {
        if self.engine.lock().unwrap().fail_answers {
            return Err(MediaError::Description("mock answer failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(MediaError::Description("peer is closed".to_string()));
        }
        state.remote_offers.push(remote_offer.to_string());
        state.remote_description_set = true;
        state.answers_created += 1;
        Ok(format!(
            "v=0 answer-{}-{}",
            self.remote, state.answers_created
        ))
    }

    async fn apply_answer(&mut self, remote_answer: &str) -> Result<(), MediaError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(MediaError::Description("peer is closed".to_string()));
        }
        state.applied_answers.push(remote_answer.to_string());
        state.remote_description_set = true;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError> {
        if self.engine.lock().unwrap().fail_candidates {
            return Err(MediaError::Candidate("mock candidate failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if !state.remote_description_set {
            return Err(MediaError::Candidate(
                "no remote description set".to_string(),
            ));
        }
        state.candidates.push(candidate.clone());
        Ok(())
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.state.lock().unwrap().audio_enabled = enabled;
    }

    async fn replace_video_track(&mut self, track: u32) -> Result<(), MediaError> {
        self.state.lock().unwrap().video_tracks.push(track);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
