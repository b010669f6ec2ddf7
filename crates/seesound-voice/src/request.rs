//! Announcement requests and their urgency levels.

use crate::error::{AnnounceError, AnnounceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use uuid::Uuid;

/// Urgency of an announcement. Lower value = more urgent.
///
/// | Level | Meaning |
/// |-------|---------|
/// | 1 | Critical / stop |
/// | 2 | Urgent warning |
/// | 3 | Warning |
/// | 4 | Info (default) |
/// | 5 | Question-answer result |
/// | 6 | Ambient scene description |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const CRITICAL: Priority = Priority(1);
    pub const URGENT: Priority = Priority(2);
    pub const WARNING: Priority = Priority(3);
    pub const INFO: Priority = Priority(4);
    pub const ANSWER: Priority = Priority(5);
    pub const AMBIENT: Priority = Priority(6);

    /// Highest level a request may reach through queue aging.
    pub const AGING_CEILING: Priority = Priority::WARNING;

    pub fn new(level: u8) -> AnnounceResult<Self> {
        if (1..=6).contains(&level) {
            Ok(Self(level))
        } else {
            Err(AnnounceError::InvalidRequest(format!(
                "priority {} outside 1..=6",
                level
            )))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Levels 1 and 2 cut off whatever is currently being spoken.
    pub fn preempts(self) -> bool {
        self.0 <= 2
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::INFO
    }
}

impl TryFrom<u8> for Priority {
    type Error = AnnounceError;

    fn try_from(level: u8) -> AnnounceResult<Self> {
        Priority::new(level)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// A single unit of text waiting to be spoken. Never mutated once queued.
#[derive(Debug, Clone)]
pub struct AnnouncementRequest {
    pub id: Uuid,
    pub priority: Priority,
    pub text: String,
    /// Per-request rate override; falls back to the scheduler's speaking rate.
    pub speed: Option<f32>,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) queued_since: Instant,
    pub(crate) sequence: u64,
}

impl AnnouncementRequest {
    /// Build a request, rejecting blank text.
    pub fn new(text: impl Into<String>, priority: Priority) -> AnnounceResult<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AnnounceError::InvalidRequest(
                "announcement text is empty".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            priority,
            text: trimmed.to_string(),
            speed: None,
            enqueued_at: Utc::now(),
            queued_since: Instant::now(),
            sequence: 0,
        })
    }

    /// Speak this request at a fixed rate multiplier instead of the configured one.
    pub fn with_speed(mut self, speed: f32) -> AnnounceResult<Self> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(AnnounceError::InvalidRequest(format!(
                "speaking rate {} must be positive",
                speed
            )));
        }
        self.speed = Some(speed);
        Ok(self)
    }
}
