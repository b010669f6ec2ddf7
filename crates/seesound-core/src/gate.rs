//! Per-object announcement gate, keyed `"{class}-{region}"`.

use crate::tracking::ScreenRegion;
use seesound_voice::Priority;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct GateEntry {
    at: Instant,
    priority: Priority,
}

/// Keeps the same object in the same place from being re-announced every frame.
///
/// An escalation (more urgent than what was last let through for that key) always passes.
#[derive(Debug)]
pub struct AnnouncementGate {
    interval: Duration,
    last: HashMap<String, GateEntry>,
}

impl AnnouncementGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    pub fn key(class_name: &str, region: ScreenRegion) -> String {
        format!("{}-{}", class_name.trim().to_lowercase(), region)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Whether an announcement for this key would pass now. Records nothing.
    pub fn is_open(
        &self,
        class_name: &str,
        region: ScreenRegion,
        priority: Priority,
        now: Instant,
    ) -> bool {
        let key = Self::key(class_name, region);
        let open = match self.last.get(&key) {
            None => true,
            Some(entry) => {
                priority < entry.priority
                    || now.saturating_duration_since(entry.at) >= self.interval
            }
        };
        if !open {
            debug!("Gate: holding back {} ({})", key, priority);
        }
        open
    }

    /// Record that an announcement for this key went out.
    pub fn record(&mut self, class_name: &str, region: ScreenRegion, priority: Priority, now: Instant) {
        self.last
            .insert(Self::key(class_name, region), GateEntry { at: now, priority });
    }

    /// [`is_open`](Self::is_open) followed by [`record`](Self::record) on a pass.
    pub fn admit(
        &mut self,
        class_name: &str,
        region: ScreenRegion,
        priority: Priority,
        now: Instant,
    ) -> bool {
        let open = self.is_open(class_name, region, priority, now);
        if open {
            self.record(class_name, region, priority, now);
        }
        open
    }

    /// Drop entries old enough that they no longer suppress anything.
    pub fn prune(&mut self, now: Instant) {
        let interval = self.interval;
        self.last
            .retain(|_, e| now.saturating_duration_since(e.at) < interval);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}
