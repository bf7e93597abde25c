//! Error types for the worker-facing protocol.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Failures that end a worker connection.
///
/// Malformed requests are not errors at this level: they are answered on
/// the wire and the connection stays open.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Line framing error on write
    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),

    /// The peer went away while we were writing
    #[error("Connection lost")]
    Disconnected,

    /// TLS handshake did not finish in time
    #[error("TLS handshake timed out")]
    HandshakeTimeout,
}

/// Convenient Result type for protocol operations.
pub type StratumResult<T> = Result<T, StratumError>;
