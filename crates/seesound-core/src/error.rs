//! Error types for perception routing

use seesound_voice::AnnounceError;
use thiserror::Error;

/// Result type alias for perception operations
pub type PerceptionResult<T> = Result<T, PerceptionError>;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Distance estimator calibration failed: {0}")]
    Calibration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Replay script error on line {line}: {reason}")]
    Script { line: usize, reason: String },

    #[error(transparent)]
    Announce(#[from] AnnounceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
