//! Error types for the receiver audio link

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
///
/// None of these reach the listener: the playback layer turns them into
/// the inline fallback or into silence.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Real-time output thread unavailable: {0}")]
    RealtimeUnavailable(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Control session / transport errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Session task has shut down")]
    ShutDown,
}

/// Control frame errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed control frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown demodulator mode: {0}")]
    UnknownDemodulator(String),

    #[error("Invalid property value for {property}: {value}")]
    InvalidValue { property: String, value: String },
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
