//! Proximity state machine
//!
//! Classifies the primary face by box width (a distance proxy) and tracks how
//! long it has stayed continuously inside the capture window. A tick without
//! a face clears the timer immediately; there is no grace period.

use crate::domain::Detection;
use crate::infra::config::MonitoringConfig;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Where the primary face sits relative to the capture window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityStatus {
    NoFace,
    TooFar,
    InRange,
    TooClose,
}

impl ProximityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProximityStatus::NoFace => "no_face",
            ProximityStatus::TooFar => "too_far",
            ProximityStatus::InRange => "in_range",
            ProximityStatus::TooClose => "too_close",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProximityState {
    pub in_range: bool,
    pub range_entered_at: Option<Instant>,
}

/// Result of one proximity update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityReading {
    pub status: ProximityStatus,
    /// Continuous time in range (zero when out of range)
    pub stable_for: Duration,
    /// Time left until capture becomes eligible
    pub remaining: Duration,
    pub capture_eligible: bool,
}

impl ProximityReading {
    fn out_of_range(status: ProximityStatus) -> Self {
        Self { status, stable_for: Duration::ZERO, remaining: Duration::ZERO, capture_eligible: false }
    }
}

pub struct ProximityTracker {
    min_width: f32,
    max_width: f32,
    capture_delay: Duration,
    state: ProximityState,
}

impl ProximityTracker {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            min_width: config.min_face_width,
            max_width: config.max_face_width,
            capture_delay: config.capture_delay(),
            state: ProximityState::default(),
        }
    }

    /// Classify a face width against the inclusive [min, max] window
    pub fn classify(&self, width: f32) -> ProximityStatus {
        if width < self.min_width {
            ProximityStatus::TooFar
        } else if width > self.max_width {
            ProximityStatus::TooClose
        } else {
            ProximityStatus::InRange
        }
    }

    /// Advance the state machine with this tick's primary detection
    pub fn update(&mut self, primary: Option<&Detection>, now: Instant) -> ProximityReading {
        let Some(detection) = primary else {
            self.reset();
            return ProximityReading::out_of_range(ProximityStatus::NoFace);
        };

        let status = self.classify(detection.width());
        if status != ProximityStatus::InRange {
            self.reset();
            return ProximityReading::out_of_range(status);
        }

        let entered_at = match self.state.range_entered_at {
            Some(t) if self.state.in_range => t,
            _ => {
                debug!(width = %detection.width(), "face_entered_range");
                self.state = ProximityState { in_range: true, range_entered_at: Some(now) };
                now
            }
        };

        let stable_for = now.saturating_duration_since(entered_at);
        ProximityReading {
            status,
            stable_for,
            remaining: self.capture_delay.saturating_sub(stable_for),
            capture_eligible: stable_for >= self.capture_delay,
        }
    }

    /// Forget the in-range timer; the face must re-stabilize
    pub fn reset(&mut self) {
        self.state = ProximityState::default();
    }

    pub fn state(&self) -> ProximityState {
        self.state
    }
}
