//! Parley Signal Relay
//!
//! Stateless-media signaling server for multi-party calls: no media
//! ever passes through this process. It tracks room membership and
//! forwards opaque negotiation payloads between identified clients.
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! ├── owns rooms and sessions (sole source of truth for membership)
//! └── one ConnectionActorHandle per live WebSocket
//!     └── ConnectionActor drains server messages into the socket
//! ```
//!
//! All membership mutation and relay routing happen on the registry's
//! single mailbox, so joins, leaves and relays are totally ordered
//! without locks. Event ordering *across* connections is not
//! guaranteed and is not needed: clients tolerate reordering by
//! creating peer state lazily, joins are idempotent, and relays to
//! departed targets are silently dropped.
//!
//! # Modules
//!
//! - [`actors`] - Registry and connection actors
//! - [`ws`] - WebSocket upgrade and per-socket read loop
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`metrics`] - Relay counters and gauges
//! - [`observability`] - Health endpoints

pub mod actors;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod observability;
pub mod ws;
