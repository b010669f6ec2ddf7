//! # SeeSound Voice - Priority Announcement Scheduling
//!
//! Every spoken word in SeeSound goes through one [`AnnouncementScheduler`]. It decides
//! what is said, in which order, and when something urgent cuts off what is playing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Announcement Scheduler                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Producers   │→ │ Dedup + Rank │→ │ Pacing (gap) │      │
//! │  │  (P1 .. P6)  │  │ (10s window) │  │              │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         ↓ P1/P2                               ↓             │
//! │  ┌──────────────┐                    ┌──────────────┐      │
//! │  │  Preemption  │───────────────────→│ Utterance    │      │
//! │  │              │    Kill Signal     │ Player (TTS) │      │
//! │  └──────────────┘                    └──────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod player;
pub mod request;
pub mod scheduler;
pub mod voice_output;

pub use error::{AnnounceError, AnnounceResult};
pub use player::{PlaybackOutcome, SpeechCredential, TranscriptPlayer, Utterance, UtterancePlayer};
pub use request::{AnnouncementRequest, Priority};
pub use scheduler::{AnnouncementScheduler, SchedulerConfig, SchedulerStatus, MIN_AGING_STEP};
pub use voice_output::{AzureSpeechTts, PlaceholderTts, SpeakerPlayer, TtsBackend};
