//! Replay of recorded perception events from a JSON-lines script.
//!
//! Each non-empty line is one event with a millisecond offset from the start:
//!
//! ```text
//! {"at_ms": 0,    "type": "navigation", "enabled": true}
//! {"at_ms": 0,    "type": "detections", "width": 1280, "height": 720,
//!  "detections": [{"bbox": {"x": 600, "y": 200, "width": 80, "height": 200},
//!                  "class_name": "person", "confidence": 0.91}]}
//! {"at_ms": 500,  "type": "markers", "width": 1280,
//!  "sightings": [{"id": 3, "center": [640, 360], "distance_m": 1.2}]}
//! {"at_ms": 2000, "type": "answer", "text": "The door is on your left."}
//! {"at_ms": 4000, "type": "scene", "text": "A quiet corridor with two doors."}
//! ```
//!
//! Lines starting with `#` are comments.

use crate::classifier::DetectionFrame;
use crate::error::{PerceptionError, PerceptionResult};
use crate::navigation::MarkerSighting;
use crate::pipeline::PerceptionRouter;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptEvent {
    Detections(DetectionFrame),
    Markers {
        width: u32,
        sightings: Vec<MarkerSighting>,
    },
    Answer {
        text: String,
    },
    Scene {
        text: String,
    },
    /// Turn the marker guide on or off, optionally locking onto one marker.
    Navigation {
        enabled: bool,
        #[serde(default)]
        target: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: ScriptEvent,
}

/// What a replay pushed into the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub detections_announced: usize,
    pub instructions_announced: usize,
    pub answers: usize,
    pub scenes: usize,
}

/// Parse a script, ordered by offset (stable for equal offsets).
pub fn parse_script(source: &str) -> PerceptionResult<Vec<TimedEvent>> {
    let mut events = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: TimedEvent = serde_json::from_str(line).map_err(|e| PerceptionError::Script {
            line: index + 1,
            reason: e.to_string(),
        })?;
        events.push(event);
    }
    events.sort_by_key(|e| e.at_ms);
    Ok(events)
}

pub fn load_script(path: &Path) -> PerceptionResult<Vec<TimedEvent>> {
    let source = std::fs::read_to_string(path)?;
    parse_script(&source)
}

/// Feed `events` through `router` at their offsets, then wait for speech to finish.
pub async fn run_script(
    router: &mut PerceptionRouter,
    events: &[TimedEvent],
) -> PerceptionResult<ReplaySummary> {
    let start = Instant::now();
    let mut summary = ReplaySummary::default();

    for timed in events {
        tokio::time::sleep_until(start + Duration::from_millis(timed.at_ms)).await;
        let now = Instant::now();
        summary.events += 1;

        match &timed.event {
            ScriptEvent::Detections(frame) => {
                summary.detections_announced += router.on_detections(frame, now)?.len();
            }
            ScriptEvent::Markers { width, sightings } => {
                summary.instructions_announced += router.on_markers(sightings, *width, now)?.len();
            }
            ScriptEvent::Answer { text } => {
                router.on_answer(text)?;
                summary.answers += 1;
            }
            ScriptEvent::Scene { text } => {
                router.on_scene_description(text)?;
                summary.scenes += 1;
            }
            ScriptEvent::Navigation { enabled, target } => {
                let guide = router.guide_mut();
                if *enabled {
                    guide.enable();
                    match target {
                        Some(id) => guide.lock_target(*id),
                        None => guide.release_target(),
                    }
                } else {
                    guide.disable();
                }
            }
        }
    }

    router.scheduler().wait_until_idle().await?;
    info!(
        "Replay finished: {} events, {} detections, {} marker instructions",
        summary.events, summary.detections_announced, summary.instructions_announced
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders_events() {
        let script = r#"
# warm-up
{"at_ms": 500, "type": "answer", "text": "It is a mug."}
{"at_ms": 0, "type": "navigation", "enabled": true, "target": 4}
{"at_ms": 0, "type": "detections", "width": 640, "height": 480, "detections": []}
"#;
        let events = parse_script(script).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0].event,
            ScriptEvent::Navigation {
                enabled: true,
                target: Some(4)
            }
        );
        assert!(matches!(events[1].event, ScriptEvent::Detections(_)));
        assert_eq!(events[2].at_ms, 500);
    }

    #[test]
    fn marker_sighting_fields_default() {
        let script = r#"{"at_ms": 10, "type": "markers", "width": 1280, "sightings": [{"id": 3, "center": [640, 360], "distance_m": 1.2}]}"#;
        let events = parse_script(script).unwrap();
        match &events[0].event {
            ScriptEvent::Markers { width, sightings } => {
                assert_eq!(*width, 1280);
                assert_eq!(sightings[0].id, 3);
                assert_eq!(sightings[0].angle_deg, 0.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_script("{\"at_ms\": 0, \"type\": \"scene\", \"text\": \"ok\"}\n{not json}").unwrap_err();
        assert!(matches!(err, PerceptionError::Script { line: 2, .. }));
    }
}
