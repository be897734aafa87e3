//! Error types for the voxstream session core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Out of order chunk: expected sequence index {expected}, received {received}")]
    OutOfOrderChunk { expected: u64, received: u64 },

    #[error("Malformed payload in chunk {chunk}: {reason}")]
    MalformedPayload { chunk: u64, reason: String },

    #[error("Playback underrun at chunk {chunk}: buffer arrived {late_by:?} late")]
    PlaybackUnderrun { chunk: u64, late_by: Duration },

    #[error("Container write failure: {0}")]
    ContainerWriteFailure(String),

    #[error("No chunk received within {0:?}")]
    Timeout(Duration),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Event stream error: {0}")]
    EventParse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error ends the session it was raised in.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::UnsupportedEncoding(_)
            | Error::UnsupportedSampleRate(_)
            | Error::OutOfOrderChunk { .. }
            | Error::Timeout(_)
            | Error::SessionClosed
            | Error::ConfigError(_)
            | Error::IoError(_)
            | Error::SerializationError(_) => true,
            Error::MalformedPayload { .. }
            | Error::PlaybackUnderrun { .. }
            | Error::ContainerWriteFailure(_)
            | Error::EventParse(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigError(e.to_string())
    }
}
