//! Actor model for the signal relay.
//!
//! Two levels, both cancellation-scoped:
//!
//! ```text
//! RoomRegistryActor (singleton per process)
//! ├── owns all room membership and session state
//! └── holds a ConnectionActorHandle per live WebSocket
//!     └── ConnectionActor (one per connection, drains to the socket)
//! ```
//!
//! All registry state is mutated by the single registry task, one
//! mailbox message at a time; there is no locking anywhere in the
//! membership or relay paths.

pub mod connection;
pub mod messages;
pub mod registry;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::{MembershipSnapshot, RegistryStatus};
pub use registry::RoomRegistryHandle;
