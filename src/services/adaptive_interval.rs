//! Adaptive tick interval
//!
//! Ticks slowly while the kiosk is empty and quickly once faces appear.
//! Counters for consecutive face and empty ticks pick a target interval; with
//! smoothing enabled the current interval walks toward the target by a bounded
//! step per tick instead of jumping.

use crate::infra::config::AdaptiveSection;
use tokio::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptiveStats {
    pub total_ticks: u64,
    pub face_ticks: u64,
    pub interval_changes: u64,
}

pub struct AdaptiveInterval {
    enabled: bool,
    fixed_ms: u64,
    min_ms: u64,
    max_ms: u64,
    no_face_threshold: u32,
    face_frames: u32,
    step_ms: u64,
    smoothing: bool,
    current_ms: u64,
    target_ms: u64,
    face_count: u32,
    no_face_count: u32,
    stats: AdaptiveStats,
}

impl AdaptiveInterval {
    /// `fixed_interval` is used unchanged when adaptation is disabled
    pub fn new(config: &AdaptiveSection, fixed_interval: Duration) -> Self {
        let min_ms = config.min_interval_ms.max(1);
        let max_ms = config.max_interval_ms.max(min_ms);
        Self {
            enabled: config.enabled,
            fixed_ms: fixed_interval.as_millis() as u64,
            min_ms,
            max_ms,
            no_face_threshold: config.no_face_threshold.max(1),
            face_frames: config.face_frames.max(1),
            step_ms: config.transition_step_ms.max(1),
            smoothing: config.smoothing,
            current_ms: max_ms,
            target_ms: max_ms,
            face_count: 0,
            no_face_count: 0,
            stats: AdaptiveStats::default(),
        }
    }

    /// Feed one tick's face count and get the delay before the next tick
    pub fn update(&mut self, faces: usize) -> Duration {
        if !self.enabled {
            return Duration::from_millis(self.fixed_ms);
        }
        self.stats.total_ticks += 1;

        if faces > 0 {
            self.stats.face_ticks += 1;
            self.face_count = self.face_count.saturating_add(1);
            self.no_face_count = 0;
            if self.face_count >= self.face_frames {
                self.set_target(self.min_ms);
            }
        } else {
            self.no_face_count = self.no_face_count.saturating_add(1);
            self.face_count = 0;
            if self.no_face_count >= self.no_face_threshold {
                self.set_target(self.max_ms);
            }
        }

        self.current_ms = if self.smoothing {
            if self.current_ms < self.target_ms {
                (self.current_ms + self.step_ms).min(self.target_ms)
            } else {
                self.current_ms.saturating_sub(self.step_ms).max(self.target_ms)
            }
        } else {
            self.target_ms
        };
        self.current()
    }

    fn set_target(&mut self, target_ms: u64) {
        if self.target_ms != target_ms {
            debug!(from_ms = %self.target_ms, to_ms = %target_ms, "tick_interval_target_changed");
            self.target_ms = target_ms;
            self.stats.interval_changes += 1;
        }
    }

    pub fn current(&self) -> Duration {
        if self.enabled {
            Duration::from_millis(self.current_ms)
        } else {
            Duration::from_millis(self.fixed_ms)
        }
    }

    pub fn target(&self) -> Duration {
        Duration::from_millis(self.target_ms)
    }

    /// Back to the slow interval with counters cleared
    pub fn reset(&mut self) {
        self.current_ms = self.max_ms;
        self.target_ms = self.max_ms;
        self.face_count = 0;
        self.no_face_count = 0;
    }

    pub fn stats(&self) -> AdaptiveStats {
        self.stats
    }
}
