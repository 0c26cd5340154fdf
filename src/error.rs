//! Error types for sockwire.

use thiserror::Error;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SockwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed frame, oversized message, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload could not be interpreted as the requested type.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// No handler registered for the given action code.
    #[error("Handler not found for action code: {0}")]
    HandlerNotFound(i32),

    /// A reply is already being awaited on this connection.
    #[error("Connection is busy awaiting another reply")]
    Busy,

    /// Connection is not (or no longer) connected.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connect hook refused the connection.
    #[error("Connection rejected by protocol")]
    Rejected,

    /// Connecting did not complete in time.
    #[error("Connect timed out")]
    ConnectTimeout,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using SockwireError.
pub type Result<T> = std::result::Result<T, SockwireError>;
