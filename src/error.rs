//! Relay error types.
//!
//! Two layers of failure exist in the relay:
//!
//! - [`SessionError`] covers everything that can go wrong on a single
//!   client transport. These never leave the owning session's worker
//!   (or, for write failures, the broadcast engine).
//! - [`RelayError`] covers process-level and admission failures. Only
//!   [`RelayError::Bind`] and [`RelayError::Accept`] are fatal to the
//!   server process.

use std::io;
use std::time::Duration;

use crate::domain::SessionId;

/// Failure on a single session transport.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Underlying I/O error from the socket.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed its side of the connection.
    #[error("end of stream")]
    EndOfStream,

    /// The session was closed locally while an operation was pending.
    #[error("session closed")]
    SessionClosed,

    /// A write did not complete within the configured timeout.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// An inbound line was not valid UTF-8.
    #[error("inbound line is not valid utf-8")]
    InvalidUtf8,

    /// An inbound line exceeded the configured maximum length.
    #[error("inbound line exceeds {limit} bytes")]
    LineTooLong {
        /// Maximum accepted line length in bytes.
        limit: usize,
    },

    /// Outbound text would break newline framing.
    #[error("outbound text contains a line break")]
    InvalidMessage,
}

impl SessionError {
    /// Returns `true` if this error means the peer went away rather than
    /// misbehaving (used to pick the log level on disconnect).
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::EndOfStream | Self::SessionClosed | Self::Io(_) | Self::WriteTimeout(_)
        )
    }
}

/// Process-level and admission errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listening address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The listening socket failed while accepting.
    #[error("listener failed: {0}")]
    Accept(#[source] io::Error),

    /// A session with the same id is already registered.
    #[error("session {0} is already registered")]
    DuplicateId(SessionId),

    /// The registration handshake did not produce a usable display name.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}
