//! User preferences: defaults -> TOML file -> `SEESOUND__*` environment.

use crate::classifier::PriorityMode;
use crate::error::PerceptionResult;
use seesound_voice::{SchedulerConfig, SpeechCredential};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const SPEED_RANGE: (f32, f32) = (0.5, 2.0);
pub const INTERVAL_RANGE_SECS: (u64, u64) = (5, 30);

/// Default location of the preferences file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/seesound.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Speaking rate multiplier, 0.5 to 2.0.
    pub tts_speed: f32,
    /// How long the same object in the same place stays quiet, 5 to 30 seconds.
    pub announcement_interval_secs: u64,
    pub priority_mode: PriorityMode,
    /// Silence between utterances.
    #[serde(default)]
    pub minimum_gap_ms: u64,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            tts_speed: 1.0,
            announcement_interval_secs: 10,
            priority_mode: PriorityMode::Dynamic,
            minimum_gap_ms: 0,
        }
    }
}

impl UserPreferences {
    /// Load from `SEESOUND_CONFIG` (or `config/seesound.toml`) plus environment overrides.
    pub fn load() -> PerceptionResult<Self> {
        let path = std::env::var("SEESOUND_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load with `path` as the preferences file. A missing file just means defaults.
    pub fn load_from(path: &Path) -> PerceptionResult<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("tts_speed", f64::from(defaults.tts_speed))?
            .set_default("announcement_interval_secs", defaults.announcement_interval_secs as i64)?
            .set_default("priority_mode", "dynamic")?
            .set_default("minimum_gap_ms", defaults.minimum_gap_ms as i64)?;

        let builder = if path.exists() {
            info!("Loading preferences from {}", path.display());
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("SEESOUND")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let prefs: Self = built.try_deserialize()?;
        Ok(prefs.clamped())
    }

    /// Pull every value into its documented range.
    pub fn clamped(mut self) -> Self {
        let speed = if self.tts_speed.is_finite() {
            self.tts_speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1)
        } else {
            1.0
        };
        if speed != self.tts_speed {
            warn!("tts_speed {} out of range, using {}", self.tts_speed, speed);
            self.tts_speed = speed;
        }
        let interval = self
            .announcement_interval_secs
            .clamp(INTERVAL_RANGE_SECS.0, INTERVAL_RANGE_SECS.1);
        if interval != self.announcement_interval_secs {
            warn!(
                "announcement_interval_secs {} out of range, using {}",
                self.announcement_interval_secs, interval
            );
            self.announcement_interval_secs = interval;
        }
        self
    }

    pub fn announcement_interval(&self) -> Duration {
        Duration::from_secs(self.announcement_interval_secs)
    }

    /// Scheduler options derived from these preferences.
    pub fn scheduler_config(&self, credential: Option<SpeechCredential>) -> SchedulerConfig {
        SchedulerConfig {
            credential,
            speaking_rate: self.tts_speed,
            minimum_gap: Duration::from_millis(self.minimum_gap_ms),
            ..SchedulerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let prefs = UserPreferences::default();
        assert_eq!(prefs.tts_speed, 1.0);
        assert_eq!(prefs.announcement_interval(), Duration::from_secs(10));
        assert_eq!(prefs.priority_mode, PriorityMode::Dynamic);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = UserPreferences::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(prefs, UserPreferences::default());
    }

    #[test]
    fn file_values_are_loaded_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seesound.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "tts_speed = 3.5").unwrap();
        writeln!(file, "announcement_interval_secs = 2").unwrap();
        writeln!(file, "priority_mode = \"static\"").unwrap();
        writeln!(file, "minimum_gap_ms = 1500").unwrap();
        drop(file);

        let prefs = UserPreferences::load_from(&path).unwrap();
        assert_eq!(prefs.tts_speed, 2.0);
        assert_eq!(prefs.announcement_interval_secs, 5);
        assert_eq!(prefs.priority_mode, PriorityMode::Static);

        let config = prefs.scheduler_config(None);
        assert_eq!(config.speaking_rate, 2.0);
        assert_eq!(config.minimum_gap, Duration::from_millis(1500));
        assert_eq!(config.dedup_cooldown, Duration::from_secs(10));
    }

    #[test]
    fn clamp_keeps_values_in_range() {
        let prefs = UserPreferences {
            tts_speed: 0.1,
            announcement_interval_secs: 90,
            ..Default::default()
        }
        .clamped();
        assert_eq!(prefs.tts_speed, 0.5);
        assert_eq!(prefs.announcement_interval_secs, 30);
    }
}
