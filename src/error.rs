//! Error types for RPC calls.
//!
//! Every call resolves exactly once, either with the operation's result or
//! with one of the failures below. None of them are retried locally.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect, write, read or timeout failure on the socket.
    Transport,
    /// Reply bytes were not well-formed, or had the wrong shape.
    Decode,
    /// The server answered with an `error` field.
    Server,
    /// The reply id does not belong to the request.
    Correlation,
    /// The request was rejected before anything was sent.
    InvalidRequest,
}

/// Failure of a single RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Failed to connect to the server socket.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// I/O error while writing the request or reading the reply.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// The server closed the connection before a full reply arrived.
    #[error("Connection closed by server before a reply was received")]
    ConnectionClosed,

    /// No reply within the configured bound.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Frame header was missing, malformed or announced an oversized body.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Reply is not well-formed JSON or does not have the expected shape.
    #[error("Failed to decode reply: {0}")]
    Decode(#[source] serde_json::Error),

    /// Server-reported failure, message passed through verbatim.
    #[error("Server error: {message}")]
    Server {
        /// Message as sent by the server
        message: String,
    },

    /// Reply id does not match the id that was sent.
    #[error("Reply id mismatch: expected {expected}, got {}", display_id(.received))]
    Correlation {
        /// Id carried by the request
        expected: u64,
        /// Id found in the reply, if any
        received: Option<serde_json::Value>,
    },

    /// Request rejected locally.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn display_id(id: &Option<serde_json::Value>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

impl RpcError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::ConnectionFailed(_)
            | RpcError::Io(_)
            | RpcError::ConnectionClosed
            | RpcError::Timeout(_)
            | RpcError::Framing(_) => ErrorKind::Transport,
            RpcError::Decode(_) => ErrorKind::Decode,
            RpcError::Server { .. } => ErrorKind::Server,
            RpcError::Correlation { .. } => ErrorKind::Correlation,
            RpcError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// True for connect/read/write/timeout failures.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                RpcError::ConnectionFailed(err)
            }
            _ => RpcError::Io(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Decode(err)
    }
}
