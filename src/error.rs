//! Error types shared by the event loop and the WebSocket engine.

use std::fmt;
use std::io;

/// A WebSocket close code, carried by [`Error::Protocol`] so callers can echo
/// it back to the peer in an outbound close frame.
pub type CloseCode = u16;

/// Everything that can go wrong in `waveloop`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A syscall or other OS-level operation failed. Fatal to the operation
    /// that raised it; usually also fatal to the socket it was performed on.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent a frame or message that violates the WebSocket
    /// protocol. `code` is the close code that should be sent back.
    #[error("protocol error ({code}): {message}")]
    Protocol { code: CloseCode, message: String },

    /// The opening handshake could not be completed (bad request line,
    /// missing header, key mismatch, ...).
    #[error("handshake error: {0}")]
    Handshake(String),

    /// A second instance tried to acquire a [`crate::interlock::SingleInstanceGuard`]
    /// that is already held.
    #[error("another instance is already running")]
    AlreadyRunning,

    /// A fixed-size resource (thread table, source table, ...) has no room
    /// left for a new entry.
    #[error("pool exhausted: {0}")]
    PoolExhausted(&'static str),

    /// The loop, thread, or socket this operation targeted is gone.
    #[error("{0} no longer exists")]
    Gone(&'static str),
}

impl Error {
    /// Build a [`Error::Protocol`] error from a code and a displayable
    /// message, matching the shape `Client3::writeCloseWithCode` expects.
    pub fn protocol(code: CloseCode, message: impl fmt::Display) -> Self {
        Error::Protocol {
            code,
            message: message.to_string(),
        }
    }

    /// The close code that should be sent to the peer for this error, if
    /// the error originated from the WebSocket layer.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
