//! Call session error types.

use thiserror::Error;

/// Errors surfaced by the session coordinator and signaling channel.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Signaling channel failure (connect or socket I/O).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal error (actor mailbox or response channel failure).
    #[error("Internal error: {0}")]
    Internal(String),
}
