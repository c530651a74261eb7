//! # Client Errors
//!
//! Purpose: One error type for configuration, transport, protocol and server
//! failures, plus the resumable/non-resumable split the pool relies on.
//!
//! ## Design Principles
//! 1. **Typed Failures**: Every failure mode is a variant, never a panic.
//! 2. **Connection Health**: `is_resumable` decides whether a connection is
//!    pooled again or closed.
//! 3. **No Swallowing**: Errors always propagate to the caller.

use std::io;

use thiserror::Error;

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server address could not be parsed or resolved.
    #[error("invalid server '{server}': {reason}")]
    InvalidAddress { server: String, reason: String },
    /// Server address carried an option other than `db` or `passwd`.
    #[error("unknown server option: {0}")]
    UnknownOption(String),
    /// Command arguments were rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The selector has no registered servers.
    #[error("no servers configured or available")]
    NoServers,
    /// Dialing took longer than the connect timeout.
    #[error("connect timeout to {addr}")]
    ConnectTimeout { addr: String },
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(io::Error),
    /// Peer closed the connection before a reply arrived.
    #[error("connection closed by server")]
    ConnectionClosed,
    /// Server returned an error reply.
    #[error("server error: {0}")]
    Server(String),
    /// No data arrived before the socket deadline.
    #[error("timed out")]
    Timeout,
    /// Reply framing could not be parsed; the stream is out of sync.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Reply type did not match what the command expects.
    #[error("unexpected response")]
    UnexpectedResponse,
}

impl ClientError {
    /// Returns true when the connection that produced this error is still
    /// usable.
    ///
    /// Only error replies qualify: the request reached the server and the
    /// framing is intact. Timeouts, broken pipes and parse failures all leave
    /// the stream in an unknown state.
    pub fn is_resumable(&self) -> bool {
        matches!(self, ClientError::Server(_))
    }

    /// Returns true for any flavour of timeout, connect or read/write.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout | ClientError::ConnectTimeout { .. })
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            // Socket timeouts surface as WouldBlock on unix and TimedOut on windows.
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
            io::ErrorKind::UnexpectedEof => ClientError::ConnectionClosed,
            _ => ClientError::Io(err),
        }
    }
}
