//! Error types for the preview streaming library

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Camera control error: {0}")]
    Control(#[from] ControlError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No Tokio runtime available")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire format errors for the viewfinder and preview streams
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet too short: got {len} bytes, expected at least {expected}")]
    ShortPacket { len: usize, expected: usize },

    #[error("Invalid sync bytes: {0:#06x}")]
    BadSync(u16),

    #[error("Packet length mismatch: got {len} bytes, expected {expected}")]
    LengthMismatch { len: usize, expected: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u32),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Received {got} bytes while expecting {expected}")]
    UnexpectedChunk { got: usize, expected: usize },
}

/// Network errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("No listening port available in {first}..={last}")]
    NoListeningPort { first: u16, last: u16 },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Timeout")]
    Timeout,

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Audio output errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Audio output not initialized")]
    NotInitialized,

    #[error("Audio output failed: {0}")]
    OutputFailed(String),
}

/// Camera REST control errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Request rejected by camera: {0}")]
    Rejected(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
