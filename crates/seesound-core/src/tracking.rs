//! Object track store: remembers how big each `(class, region)` looked last time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Entries unseen for longer than this are forgotten.
pub const TRACK_TTL: Duration = Duration::from_secs(30);

/// Horizontal third of the frame a detection's center falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenRegion {
    Left,
    Center,
    Right,
}

impl ScreenRegion {
    pub fn from_center(center_x: f32, frame_width: f32) -> Self {
        let third = frame_width / 3.0;
        if center_x < third {
            ScreenRegion::Left
        } else if center_x < 2.0 * third {
            ScreenRegion::Center
        } else {
            ScreenRegion::Right
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScreenRegion::Left => "left",
            ScreenRegion::Center => "center",
            ScreenRegion::Right => "right",
        }
    }
}

impl fmt::Display for ScreenRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    /// Lowercased class label.
    pub class_name: String,
    pub region: ScreenRegion,
}

impl TrackKey {
    pub fn new(class_name: &str, region: ScreenRegion) -> Self {
        Self {
            class_name: class_name.trim().to_lowercase(),
            region,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedObject {
    pub area: f32,
    pub last_seen_at: Instant,
}

/// Per-key last observation, owned by one classifier.
#[derive(Debug)]
pub struct ObjectTrackStore {
    tracks: HashMap<TrackKey, TrackedObject>,
    ttl: Duration,
}

impl Default for ObjectTrackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTrackStore {
    pub fn new() -> Self {
        Self::with_ttl(TRACK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            tracks: HashMap::new(),
            ttl,
        }
    }

    /// Record a sighting and return its relative area growth since the previous one.
    ///
    /// Returns `None` on the first sighting, or when the previous one has already expired.
    pub fn observe(&mut self, key: TrackKey, area: f32, now: Instant) -> Option<f32> {
        let growth = self
            .tracks
            .get(&key)
            .filter(|prev| !self.is_stale(prev, now) && prev.area > 0.0)
            .map(|prev| (area - prev.area) / prev.area);

        self.tracks.insert(
            key,
            TrackedObject {
                area,
                last_seen_at: now,
            },
        );
        self.evict_stale(now);
        growth
    }

    pub fn evict_stale(&mut self, now: Instant) {
        let before = self.tracks.len();
        let ttl = self.ttl;
        self.tracks
            .retain(|_, t| now.saturating_duration_since(t.last_seen_at) <= ttl);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            debug!("Track store: evicted {} stale tracks", evicted);
        }
    }

    pub fn get(&self, key: &TrackKey) -> Option<&TrackedObject> {
        self.tracks.get(key)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    fn is_stale(&self, track: &TrackedObject, now: Instant) -> bool {
        now.saturating_duration_since(track.last_seen_at) > self.ttl
    }
}
