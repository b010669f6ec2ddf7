//! **Marker navigation guide**: fiducial marker sightings to spoken directions.
//!
//! ```text
//!  disabled ──enable──▶ enabled ──lock_target──▶ target-locked
//!     ▲                    │  ◀──release_target──     │
//!     └──────disable───────┴──────────disable─────────┘   (clears cooldowns)
//! ```
//!
//! | Distance | Center | Left / right |
//! |----------|--------|--------------|
//! | near (< 0.5 m) | P1 "directly ahead. Stop here." | P2 "very close on your {dir}. Turn {dir}." |
//! | medium (< 2 m) | P2 "ahead. Continue straight." | P3 "on your {dir}. Adjust {dir}." |
//! | far | P4 "detected {d}m away on {dir}." | same |

use crate::error::{PerceptionError, PerceptionResult};
use seesound_voice::Priority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Markers within this many degrees of straight ahead count as "center".
pub const CENTER_CONE_DEG: f32 = 15.0;
pub const NEAR_M: f32 = 0.5;
pub const MEDIUM_M: f32 = 2.0;

/// One marker seen in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSighting {
    pub id: u32,
    #[serde(default)]
    pub corners: [(f32, f32); 4],
    pub center: (f32, f32),
    pub distance_m: f32,
    /// Bearing as reported by the detector, in `[-90, 90]`.
    #[serde(default)]
    pub angle_deg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Center,
    Right,
}

impl Direction {
    /// Bearing of a marker from its center x, -90 at the left edge to 90 at the right edge.
    pub fn bearing(center_x: f32, frame_width: f32) -> f32 {
        let half = frame_width / 2.0;
        ((center_x - half) / half) * 90.0
    }

    pub fn from_angle(angle_deg: f32) -> Self {
        if angle_deg.abs() < CENTER_CONE_DEG {
            Direction::Center
        } else if angle_deg < 0.0 {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Left => "left",
            Direction::Center => "center",
            Direction::Right => "right",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceBucket {
    Near,
    Medium,
    Far,
}

impl DistanceBucket {
    pub fn from_meters(distance_m: f32) -> Self {
        if distance_m < NEAR_M {
            DistanceBucket::Near
        } else if distance_m < MEDIUM_M {
            DistanceBucket::Medium
        } else {
            DistanceBucket::Far
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationInstruction {
    pub marker_id: u32,
    pub priority: Priority,
    pub text: String,
    pub direction: Direction,
    pub bucket: DistanceBucket,
}

impl NavigationInstruction {
    fn for_sighting(id: u32, distance_m: f32, direction: Direction) -> Self {
        let bucket = DistanceBucket::from_meters(distance_m);
        let (priority, text) = match (bucket, direction) {
            (DistanceBucket::Near, Direction::Center) => (
                Priority::CRITICAL,
                format!("Marker {} directly ahead. Stop here.", id),
            ),
            (DistanceBucket::Near, dir) => (
                Priority::URGENT,
                format!("Marker {} very close on your {}. Turn {}.", id, dir, dir),
            ),
            (DistanceBucket::Medium, Direction::Center) => (
                Priority::URGENT,
                format!("Marker {} ahead. Continue straight.", id),
            ),
            (DistanceBucket::Medium, dir) => (
                Priority::WARNING,
                format!("Marker {} on your {}. Adjust {}.", id, dir, dir),
            ),
            (DistanceBucket::Far, dir) => (
                Priority::INFO,
                format!(
                    "Marker {} detected {}m away on {}.",
                    id,
                    distance_m.round() as i64,
                    dir
                ),
            ),
        };
        Self {
            marker_id: id,
            priority,
            text,
            direction,
            bucket,
        }
    }
}

#[derive(Debug, Default)]
pub struct MarkerNavigationGuide {
    enabled: bool,
    target: Option<u32>,
    last_announced: HashMap<u32, Instant>,
}

impl MarkerNavigationGuide {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            info!("🧭 Marker navigation enabled");
        }
        self.enabled = true;
    }

    /// Stop guiding. Forgets the target and all cooldown history.
    pub fn disable(&mut self) {
        if self.enabled {
            info!("🧭 Marker navigation disabled");
        }
        self.enabled = false;
        self.target = None;
        self.last_announced.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Only announce marker `id` from now on.
    pub fn lock_target(&mut self, id: u32) {
        info!("🧭 Locked on marker {}", id);
        self.target = Some(id);
    }

    pub fn release_target(&mut self) {
        self.target = None;
    }

    pub fn target(&self) -> Option<u32> {
        self.target
    }

    /// Instructions for this tick, most urgent first.
    ///
    /// A marker is only announced if more than `interval` has passed since it last was.
    /// Every returned marker starts a new cooldown.
    pub fn get_instructions(
        &mut self,
        sightings: &[MarkerSighting],
        frame_width: u32,
        now: Instant,
        interval: Duration,
    ) -> PerceptionResult<Vec<NavigationInstruction>> {
        let instructions = self.pending_instructions(sightings, frame_width, now, interval)?;
        for instruction in &instructions {
            self.mark_announced(instruction.marker_id, now);
        }
        Ok(instructions)
    }

    /// Like [`get_instructions`](Self::get_instructions), but leaves the cooldowns alone.
    /// Call [`mark_announced`](Self::mark_announced) for each instruction actually delivered.
    pub fn pending_instructions(
        &self,
        sightings: &[MarkerSighting],
        frame_width: u32,
        now: Instant,
        interval: Duration,
    ) -> PerceptionResult<Vec<NavigationInstruction>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        if frame_width == 0 {
            return Err(PerceptionError::InvalidFrame(
                "frame width is zero".to_string(),
            ));
        }

        let mut instructions: Vec<NavigationInstruction> = Vec::new();
        for sighting in sightings {
            if self.target.is_some_and(|t| t != sighting.id) {
                continue;
            }
            if instructions.iter().any(|i| i.marker_id == sighting.id) {
                continue;
            }
            let cooled = self
                .last_announced
                .get(&sighting.id)
                .map_or(true, |last| now.saturating_duration_since(*last) > interval);
            if !cooled {
                debug!("Marker {} still cooling down", sighting.id);
                continue;
            }

            let angle = Direction::bearing(sighting.center.0, frame_width as f32);
            let direction = Direction::from_angle(angle);
            instructions.push(NavigationInstruction::for_sighting(
                sighting.id,
                sighting.distance_m,
                direction,
            ));
        }

        instructions.sort_by_key(|i| i.priority);
        Ok(instructions)
    }

    pub fn mark_announced(&mut self, marker_id: u32, now: Instant) {
        self.last_announced.insert(marker_id, now);
    }
}

/// Pinhole distance estimate from a marker's apparent size.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceEstimator {
    focal_length_px: Option<f32>,
}

impl DistanceEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_focal_length(focal_length_px: f32) -> Self {
        Self {
            focal_length_px: Some(focal_length_px),
        }
    }

    /// Derive the focal length from a marker of known size held at a known distance.
    pub fn calibrate(
        &mut self,
        known_distance_m: f32,
        known_size_m: f32,
        observed_px: f32,
    ) -> PerceptionResult<f32> {
        for (name, value) in [
            ("distance", known_distance_m),
            ("marker size", known_size_m),
            ("observed size", observed_px),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PerceptionError::Calibration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        let focal = observed_px * known_distance_m / known_size_m;
        self.focal_length_px = Some(focal);
        info!("Distance estimator calibrated: focal length {:.1}px", focal);
        Ok(focal)
    }

    pub fn focal_length_px(&self) -> Option<f32> {
        self.focal_length_px
    }

    pub fn estimate(&self, size_m: f32, observed_px: f32) -> PerceptionResult<f32> {
        let focal = self.focal_length_px.ok_or_else(|| {
            PerceptionError::Calibration("estimator has not been calibrated".to_string())
        })?;
        if observed_px <= 0.0 {
            return Err(PerceptionError::Calibration(format!(
                "observed size must be positive, got {}",
                observed_px
            )));
        }
        Ok(size_m * focal / observed_px)
    }

    /// Mean side length of a marker quad, in pixels.
    pub fn apparent_size(corners: &[(f32, f32); 4]) -> f32 {
        let side = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
        (0..4)
            .map(|i| side(corners[i], corners[(i + 1) % 4]))
            .sum::<f32>()
            / 4.0
    }
}
