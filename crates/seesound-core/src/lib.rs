//! # SeeSound Core: Perception to Speech
//!
//! Detections → hazard classifier → per-object gate, and marker sightings → navigation
//! guide, both feeding one priority announcement scheduler. Q&A answers and scene
//! descriptions join the same queue at the bottom.

pub mod classifier;
pub mod error;
pub mod gate;
pub mod navigation;
pub mod pipeline;
pub mod preferences;
pub mod replay;
pub mod tracking;

pub use classifier::{
    BoundingBox, Classification, ClassifierConfig, Detection, DetectionFrame,
    DynamicPriorityClassifier, PriorityMode,
};
pub use error::{PerceptionError, PerceptionResult};
pub use gate::AnnouncementGate;
pub use navigation::{
    Direction, DistanceBucket, DistanceEstimator, MarkerNavigationGuide, MarkerSighting,
    NavigationInstruction,
};
pub use pipeline::{PerceptionRouter, TELEMETRY_TARGET};
pub use preferences::UserPreferences;
pub use replay::{load_script, parse_script, run_script, ReplaySummary, ScriptEvent, TimedEvent};
pub use tracking::{ObjectTrackStore, ScreenRegion, TrackKey, TrackedObject};
