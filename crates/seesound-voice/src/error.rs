//! Error types for the announcement scheduler and speech playback

use thiserror::Error;

/// Result type alias for announcement operations
pub type AnnounceResult<T> = Result<T, AnnounceError>;

/// Errors surfaced at the scheduler boundary or by a speech backend.
///
/// A cancelled utterance is not an error; see [`crate::PlaybackOutcome::Cancelled`].
#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error("Invalid announcement request: {0}")]
    InvalidRequest(String),

    #[error("No speech credential configured; announcements cannot be played")]
    ConfigurationMissing,

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Announcement scheduler is no longer running")]
    SchedulerClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rodio::StreamError> for AnnounceError {
    fn from(err: rodio::StreamError) -> Self {
        AnnounceError::Playback(err.to_string())
    }
}

impl From<rodio::PlayError> for AnnounceError {
    fn from(err: rodio::PlayError) -> Self {
        AnnounceError::Playback(err.to_string())
    }
}

impl From<rodio::decoder::DecoderError> for AnnounceError {
    fn from(err: rodio::decoder::DecoderError) -> Self {
        AnnounceError::Playback(format!("Decode failed: {}", err))
    }
}

impl From<reqwest::Error> for AnnounceError {
    fn from(err: reqwest::Error) -> Self {
        AnnounceError::Tts(err.to_string())
    }
}
