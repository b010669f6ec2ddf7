//! **Dynamic priority classifier**: turns one detection into announcement text and urgency.
//!
//! Rules, first match wins:
//!
//! | Condition | Priority | Text |
//! |-----------|----------|------|
//! | small everyday object | 4 | `{class} on your {region}` |
//! | not an obstacle class | 4 | `{class} on your {region}` |
//! | covers > 40% of frame | 1 | `STOP! {class} very close in front!` |
//! | area grew > 30% since last sighting | 2 | `Warning! {class} getting closer on your {region}` |
//! | otherwise | 3 | `{class} on your {region}` |
//!
//! In static mode obstacle classes are always announced at 3.

use crate::error::{PerceptionError, PerceptionResult};
use crate::tracking::{ObjectTrackStore, ScreenRegion, TrackKey};
use seesound_voice::Priority;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }
}

/// One object reported by the detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
}

/// All detections of one camera frame, with the frame size in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityMode {
    /// Size and approach drive urgency.
    #[default]
    Dynamic,
    /// Obstacles always get warning level, small objects info.
    Static,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub obstacle_classes: Vec<String>,
    /// Checked before obstacles; a "cell phone" is never a hazard.
    pub small_objects: Vec<String>,
    /// Relative frame coverage above which an obstacle is "very close" (default 0.40).
    pub close_fraction: f32,
    /// Area growth between sightings above which an obstacle is approaching (default 0.30).
    pub approach_growth: f32,
    pub mode: PriorityMode,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let list = |names: &[&str]| -> Vec<String> { names.iter().map(|n| n.to_string()).collect() };
        Self {
            obstacle_classes: list(&[
                "person",
                "bicycle",
                "car",
                "motorcycle",
                "bus",
                "truck",
                "train",
                "dog",
                "horse",
                "chair",
                "couch",
                "bench",
                "bed",
                "dining table",
                "toilet",
                "potted plant",
                "fire hydrant",
                "stop sign",
                "parking meter",
                "door",
                "stairs",
                "pole",
            ]),
            small_objects: list(&["bottle", "phone", "cup", "book", "pen", "remote"]),
            close_fraction: 0.40,
            approach_growth: 0.30,
            mode: PriorityMode::Dynamic,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub priority: Priority,
    pub text: String,
    pub region: ScreenRegion,
    /// Box area over frame area.
    pub relative_size: f32,
    pub approaching: bool,
}

/// Classifier with its own track store.
#[derive(Debug, Default)]
pub struct DynamicPriorityClassifier {
    config: ClassifierConfig,
    tracks: ObjectTrackStore,
}

impl DynamicPriorityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            tracks: ObjectTrackStore::new(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn set_mode(&mut self, mode: PriorityMode) {
        self.config.mode = mode;
    }

    pub fn tracks(&self) -> &ObjectTrackStore {
        &self.tracks
    }

    pub fn classify(
        &mut self,
        detection: &Detection,
        frame_width: u32,
        frame_height: u32,
        now: Instant,
    ) -> PerceptionResult<Classification> {
        if frame_width == 0 || frame_height == 0 {
            return Err(PerceptionError::InvalidFrame(format!(
                "frame size {}x{}",
                frame_width, frame_height
            )));
        }
        let bbox = &detection.bbox;
        if !(bbox.width.is_finite() && bbox.height.is_finite()) || bbox.width <= 0.0 || bbox.height <= 0.0 {
            return Err(PerceptionError::InvalidFrame(format!(
                "{} has an empty bounding box",
                detection.class_name
            )));
        }

        let class = detection.class_name.trim();
        let region = ScreenRegion::from_center(bbox.center_x(), frame_width as f32);
        let area = bbox.area();
        let relative_size = area / (frame_width as f32 * frame_height as f32);

        let growth = self.tracks.observe(TrackKey::new(class, region), area, now);
        let approaching = growth.is_some_and(|g| g > self.config.approach_growth);

        let (priority, text) = self.rule(class, region, relative_size, approaching);
        Ok(Classification {
            priority,
            text,
            region,
            relative_size,
            approaching,
        })
    }

    fn rule(
        &self,
        class: &str,
        region: ScreenRegion,
        relative_size: f32,
        approaching: bool,
    ) -> (Priority, String) {
        let on_your = || format!("{} on your {}", class, region);
        let lower = class.to_lowercase();

        if self.config.small_objects.iter().any(|s| lower.contains(s.as_str())) {
            return (Priority::INFO, on_your());
        }
        let is_obstacle = self
            .config
            .obstacle_classes
            .iter()
            .any(|o| lower == *o || lower.contains(o.as_str()));
        if !is_obstacle {
            return (Priority::INFO, on_your());
        }

        if self.config.mode == PriorityMode::Static {
            return (Priority::WARNING, on_your());
        }
        if relative_size > self.config.close_fraction {
            (
                Priority::CRITICAL,
                format!("STOP! {} very close in front!", class),
            )
        } else if approaching {
            (
                Priority::URGENT,
                format!("Warning! {} getting closer on your {}", class, region),
            )
        } else {
            (Priority::WARNING, on_your())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn detection(class: &str, x: f32, width: f32, height: f32) -> Detection {
        Detection {
            bbox: BoundingBox {
                x,
                y: 100.0,
                width,
                height,
            },
            class_name: class.to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn person_filling_frame_is_critical() {
        let mut classifier = DynamicPriorityClassifier::default();
        // 640 x 648 = 45% of 1280 x 720
        let c = classifier
            .classify(&detection("person", 320.0, 640.0, 648.0), 1280, 720, Instant::now())
            .unwrap();
        assert_eq!(c.priority, Priority::CRITICAL);
        assert_eq!(c.text, "STOP! person very close in front!");
        assert!((c.relative_size - 0.45).abs() < 1e-6);
    }

    #[test]
    fn approach_is_inferred_from_growth() {
        let mut classifier = DynamicPriorityClassifier::default();
        let t0 = Instant::now();
        // All centered around x=640 so they share the center region.
        let first = classifier
            .classify(&detection("chair", 615.0, 50.0, 20.0), 1280, 720, t0)
            .unwrap();
        assert_eq!(first.priority, Priority::WARNING);
        assert_eq!(first.text, "chair on your center");

        let second = classifier
            .classify(&detection("chair", 605.0, 70.0, 20.0), 1280, 720, t0 + Duration::from_secs(1))
            .unwrap();
        assert!(second.approaching);
        assert_eq!(second.priority, Priority::URGENT);
        assert_eq!(second.text, "Warning! chair getting closer on your center");

        let third = classifier
            .classify(&detection("chair", 604.5, 71.0, 20.0), 1280, 720, t0 + Duration::from_secs(2))
            .unwrap();
        assert!(!third.approaching);
        assert_eq!(third.priority, Priority::WARNING);
    }

    #[test]
    fn small_objects_are_informational_even_when_close() {
        let mut classifier = DynamicPriorityClassifier::default();
        let c = classifier
            .classify(&detection("cell phone", 0.0, 1000.0, 700.0), 1280, 720, Instant::now())
            .unwrap();
        assert_eq!(c.priority, Priority::INFO);
        assert_eq!(c.text, "cell phone on your center");
    }

    #[test]
    fn unknown_classes_are_informational() {
        let mut classifier = DynamicPriorityClassifier::default();
        let c = classifier
            .classify(&detection("umbrella", 0.0, 100.0, 100.0), 1280, 720, Instant::now())
            .unwrap();
        assert_eq!(c.priority, Priority::INFO);
        assert_eq!(c.text, "umbrella on your left");
    }

    #[test]
    fn obstacle_match_is_case_insensitive_substring() {
        let mut classifier = DynamicPriorityClassifier::default();
        let c = classifier
            .classify(&detection("Office Chair", 1100.0, 100.0, 100.0), 1280, 720, Instant::now())
            .unwrap();
        assert_eq!(c.priority, Priority::WARNING);
        assert_eq!(c.text, "Office Chair on your right");
    }

    #[test]
    fn static_mode_pins_obstacles_to_warning() {
        let mut classifier = DynamicPriorityClassifier::new(ClassifierConfig {
            mode: PriorityMode::Static,
            ..Default::default()
        });
        let c = classifier
            .classify(&detection("person", 320.0, 640.0, 648.0), 1280, 720, Instant::now())
            .unwrap();
        assert_eq!(c.priority, Priority::WARNING);
        assert_eq!(c.text, "person on your center");

        let small = classifier
            .classify(&detection("cup", 0.0, 10.0, 10.0), 1280, 720, Instant::now())
            .unwrap();
        assert_eq!(small.priority, Priority::INFO);
    }

    #[test]
    fn degenerate_input_is_rejected() {
        let mut classifier = DynamicPriorityClassifier::default();
        assert!(matches!(
            classifier.classify(&detection("person", 0.0, 10.0, 10.0), 0, 720, Instant::now()),
            Err(PerceptionError::InvalidFrame(_))
        ));
        assert!(matches!(
            classifier.classify(&detection("person", 0.0, 0.0, 10.0), 1280, 720, Instant::now()),
            Err(PerceptionError::InvalidFrame(_))
        ));
    }
}
