//! **PerceptionRouter**: the glue between perception events and the announcement scheduler.
//!
//! ```text
//!  detection frame ──▶ classifier ──▶ gate ──┐
//!  marker tick ──────▶ navigation guide ─────┼──▶ AnnouncementScheduler
//!  Q&A answer (P5) / scene description (P6) ─┘
//! ```

use crate::classifier::{Classification, ClassifierConfig, DetectionFrame, DynamicPriorityClassifier};
use crate::error::{PerceptionError, PerceptionResult};
use crate::gate::AnnouncementGate;
use crate::navigation::{MarkerNavigationGuide, MarkerSighting, NavigationInstruction};
use crate::preferences::UserPreferences;
use seesound_voice::{AnnouncementScheduler, Priority, SchedulerConfig};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Target for per-detection telemetry events.
pub const TELEMETRY_TARGET: &str = "seesound::telemetry";

pub struct PerceptionRouter {
    scheduler: AnnouncementScheduler,
    scheduler_config: SchedulerConfig,
    classifier: DynamicPriorityClassifier,
    gate: AnnouncementGate,
    guide: MarkerNavigationGuide,
    /// Per-marker cooldown override; follows the announcement interval when unset.
    marker_interval: Option<Duration>,
}

impl PerceptionRouter {
    /// `scheduler_config` must be what the scheduler was spawned with; preference
    /// changes are layered on top of it.
    pub fn new(
        scheduler: AnnouncementScheduler,
        scheduler_config: SchedulerConfig,
        prefs: &UserPreferences,
    ) -> Self {
        let classifier = DynamicPriorityClassifier::new(ClassifierConfig {
            mode: prefs.priority_mode,
            ..ClassifierConfig::default()
        });
        Self {
            scheduler,
            scheduler_config,
            classifier,
            gate: AnnouncementGate::new(prefs.announcement_interval()),
            guide: MarkerNavigationGuide::new(),
            marker_interval: None,
        }
    }

    pub fn scheduler(&self) -> &AnnouncementScheduler {
        &self.scheduler
    }

    pub fn guide(&self) -> &MarkerNavigationGuide {
        &self.guide
    }

    pub fn guide_mut(&mut self) -> &mut MarkerNavigationGuide {
        &mut self.guide
    }

    /// Pin the per-marker cooldown instead of following the announcement interval.
    pub fn set_marker_interval(&mut self, interval: Duration) {
        self.marker_interval = Some(interval);
    }

    pub fn marker_interval(&self) -> Duration {
        self.marker_interval.unwrap_or_else(|| self.gate.interval())
    }

    /// Classify every detection in `frame` and enqueue the ones the gate lets through.
    ///
    /// The gate only records detections the scheduler accepted. A failed enqueue does not
    /// stop the rest of the frame; the first such error is returned afterwards.
    pub fn on_detections(
        &mut self,
        frame: &DetectionFrame,
        now: Instant,
    ) -> PerceptionResult<Vec<Classification>> {
        let mut announced = Vec::new();
        let mut first_error: Option<PerceptionError> = None;
        for detection in &frame.detections {
            let classification = match self.classifier.classify(detection, frame.width, frame.height, now) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Skipping detection {}: {}", detection.class_name, e);
                    continue;
                }
            };
            if !self.gate.is_open(
                &detection.class_name,
                classification.region,
                classification.priority,
                now,
            ) {
                continue;
            }
            if let Err(e) = self
                .scheduler
                .enqueue(classification.text.clone(), classification.priority)
            {
                warn!("Could not announce {}: {}", detection.class_name, e);
                if first_error.is_none() {
                    first_error = Some(e.into());
                }
                continue;
            }
            self.gate.record(
                &detection.class_name,
                classification.region,
                classification.priority,
                now,
            );

            info!(
                target: TELEMETRY_TARGET,
                label = %detection.class_name,
                confidence = detection.confidence,
                priority = classification.priority.level(),
                region = %classification.region,
                approaching = classification.approaching,
                "detection announced"
            );
            announced.push(classification);
        }
        self.gate.prune(now);
        match first_error {
            Some(e) => Err(e),
            None => Ok(announced),
        }
    }

    /// Run one navigation tick and enqueue whatever the guide emits.
    ///
    /// Only markers whose instruction was accepted start a cooldown.
    pub fn on_markers(
        &mut self,
        sightings: &[MarkerSighting],
        frame_width: u32,
        now: Instant,
    ) -> PerceptionResult<Vec<NavigationInstruction>> {
        let interval = self.marker_interval();
        let pending = self
            .guide
            .pending_instructions(sightings, frame_width, now, interval)?;
        let mut delivered = Vec::with_capacity(pending.len());
        let mut first_error: Option<PerceptionError> = None;
        for instruction in pending {
            if let Err(e) = self
                .scheduler
                .enqueue(instruction.text.clone(), instruction.priority)
            {
                warn!("Could not announce marker {}: {}", instruction.marker_id, e);
                if first_error.is_none() {
                    first_error = Some(e.into());
                }
                continue;
            }
            self.guide.mark_announced(instruction.marker_id, now);
            delivered.push(instruction);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    pub fn on_answer(&self, answer: &str) -> PerceptionResult<()> {
        debug!("Answer ready ({} chars)", answer.len());
        self.scheduler.enqueue(answer, Priority::ANSWER)?;
        Ok(())
    }

    pub fn on_scene_description(&self, description: &str) -> PerceptionResult<()> {
        self.scheduler.enqueue(description, Priority::AMBIENT)?;
        Ok(())
    }

    /// Apply changed preferences to the gate, classifier and scheduler.
    pub fn apply_preferences(&mut self, prefs: &UserPreferences) -> PerceptionResult<()> {
        let prefs = prefs.clone().clamped();
        self.gate.set_interval(prefs.announcement_interval());
        self.classifier.set_mode(prefs.priority_mode);

        self.scheduler_config.speaking_rate = prefs.tts_speed;
        self.scheduler_config.minimum_gap = Duration::from_millis(prefs.minimum_gap_ms);
        self.scheduler.configure(self.scheduler_config.clone())?;
        info!(
            "Preferences applied: speed {:.2}, interval {}s, mode {:?}",
            prefs.tts_speed, prefs.announcement_interval_secs, prefs.priority_mode
        );
        Ok(())
    }
}
