//! The utterance player seam: anything that can render text audibly and be cut off.

use crate::error::{AnnounceError, AnnounceResult};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Opaque credential handed through to the speech backend.
#[derive(Clone, PartialEq, Eq)]
pub struct SpeechCredential {
    pub key: String,
    pub region: String,
}

impl SpeechCredential {
    pub fn new(key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            region: region.into(),
        }
    }

    /// Build from environment: `AZURE_SPEECH_KEY` (required), `AZURE_SPEECH_REGION` (default `eastus`).
    pub fn from_env() -> AnnounceResult<Self> {
        let key = std::env::var("AZURE_SPEECH_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(AnnounceError::ConfigurationMissing)?;
        let region =
            std::env::var("AZURE_SPEECH_REGION").unwrap_or_else(|_| "eastus".to_string());
        Ok(Self::new(key, region))
    }
}

// Keys never end up in logs.
impl std::fmt::Debug for SpeechCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechCredential")
            .field("key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

/// Everything the player needs for one rendering.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Rate multiplier, 1.0 = normal speed.
    pub rate: f32,
    pub credential: SpeechCredential,
}

/// How a `speak` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Renders utterances one at a time.
///
/// `cancel` may be called from another task while `speak` is outstanding and must
/// make that `speak` return [`PlaybackOutcome::Cancelled`] promptly.
#[async_trait]
pub trait UtterancePlayer: Send + Sync {
    async fn speak(&self, utterance: Utterance) -> PlaybackOutcome;

    fn cancel(&self);
}

/// Tracks the cancellation token of the utterance currently being spoken.
#[derive(Default)]
pub(crate) struct ActiveUtterance {
    token: Mutex<Option<CancellationToken>>,
}

impl ActiveUtterance {
    pub(crate) fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.clone());
        }
        token
    }

    pub(crate) fn cancel(&self) {
        if let Ok(mut guard) = self.token.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
    }
}

/// Player that only logs and waits for roughly as long as speaking would take.
/// Used for dry runs without an audio device or speech credential.
#[derive(Default)]
pub struct TranscriptPlayer {
    active: ActiveUtterance,
}

impl TranscriptPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// About 2.5 words per second at normal rate, never shorter than 300ms.
    pub fn estimated_duration(text: &str, rate: f32) -> Duration {
        let words = text.split_whitespace().count().max(1) as f32;
        let rate = if rate > 0.0 { rate } else { 1.0 };
        let millis = (words * 400.0 / rate).round() as u64;
        Duration::from_millis(millis.max(300))
    }
}

#[async_trait]
impl UtterancePlayer for TranscriptPlayer {
    async fn speak(&self, utterance: Utterance) -> PlaybackOutcome {
        let token = self.active.begin();
        let duration = Self::estimated_duration(&utterance.text, utterance.rate);
        info!("🔈 \"{}\" ({:.1}x, ~{:?})", utterance.text, utterance.rate, duration);
        tokio::select! {
            _ = tokio::time::sleep(duration) => PlaybackOutcome::Completed,
            _ = token.cancelled() => {
                info!("🔇 cut off: \"{}\"", utterance.text);
                PlaybackOutcome::Cancelled
            }
        }
    }

    fn cancel(&self) {
        self.active.cancel();
    }
}
