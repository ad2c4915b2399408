//! Signal relay error types.
//!
//! Relay failures are scoped to a single peer pair or connection and
//! are never fatal to the server process. Internal details are logged
//! server-side and not echoed back to clients.

use common::types::SessionId;
use thiserror::Error;

/// Signal relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A message referenced a session that is not connected.
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// Internal error (actor mailbox or response channel failure).
    #[error("Internal error: {0}")]
    Internal(String),
}
