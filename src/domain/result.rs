//! Age results, sample statistics and the age gate

use crate::domain::detection::FrameGeometry;
use crate::domain::face_key::FaceKey;
use bytes::Bytes;
use serde::Serialize;
use tokio::time::{Duration, Instant};

/// A captured still, as handed to the detector and the estimator
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image (JPEG/PNG)
    pub data: Bytes,
    pub geometry: FrameGeometry,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Bytes, geometry: FrameGeometry) -> Self {
        Self { data, geometry, captured_at: Instant::now() }
    }
}

/// Output of the age-estimation backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeEstimate {
    pub age: f32,
}

impl AgeEstimate {
    /// Whole-year age as displayed and averaged
    pub fn rounded(&self) -> u32 {
        self.age.max(0.0).round() as u32
    }
}

/// How a result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Fresh,
    Cached,
    Averaged,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Fresh => "fresh",
            ResultKind::Cached => "cached",
            ResultKind::Averaged => "averaged",
        }
    }

    /// Opacity a newly inserted result starts at
    pub fn initial_opacity(&self) -> f32 {
        match self {
            ResultKind::Averaged => 1.0,
            ResultKind::Fresh | ResultKind::Cached => 0.0,
        }
    }
}

/// Summary of a completed averaging session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeStatistics {
    pub average: u32,
    pub std_dev: f64,
    pub min: u32,
    pub max: u32,
    pub samples: Vec<u32>,
}

impl AgeStatistics {
    /// Rounded mean, deviation around the rounded mean, and extrema.
    ///
    /// Returns None for an empty sample set.
    pub fn from_samples(samples: &[u32]) -> Option<Self> {
        let min = *samples.iter().min()?;
        let max = *samples.iter().max()?;
        let n = samples.len() as f64;

        let sum: f64 = samples.iter().map(|&s| s as f64).sum();
        let average = (sum / n).round();
        let variance =
            samples.iter().map(|&s| (s as f64 - average).powi(2)).sum::<f64>() / n;

        Some(Self {
            average: average as u32,
            std_dev: variance.sqrt(),
            min,
            max,
            samples: samples.to_vec(),
        })
    }
}

/// Pass/fail evaluation against a minimum age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeGate {
    pub enabled: bool,
    pub minimum_age: u32,
}

impl AgeGate {
    pub fn new(enabled: bool, minimum_age: u32) -> Self {
        Self { enabled, minimum_age }
    }

    /// `None` when gating is off
    pub fn evaluate(&self, age: u32) -> Option<bool> {
        self.enabled.then_some(age >= self.minimum_age)
    }
}

/// A displayed age result, owned by the result cache
#[derive(Debug, Clone, PartialEq)]
pub struct AgeResult {
    pub face_key: FaceKey,
    pub age: u32,
    pub passed: Option<bool>,
    pub kind: ResultKind,
    pub created_at: Instant,
    pub display_until: Instant,
    pub opacity: f32,
    pub stats: Option<AgeStatistics>,
}

impl AgeResult {
    pub fn new(
        face_key: FaceKey,
        age: u32,
        passed: Option<bool>,
        kind: ResultKind,
        now: Instant,
        display_for: Duration,
    ) -> Self {
        Self {
            face_key,
            age,
            passed,
            kind,
            created_at: now,
            display_until: now + display_for,
            opacity: kind.initial_opacity(),
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: AgeStatistics) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Still inside its guaranteed display window
    #[inline]
    pub fn is_displayed(&self, now: Instant) -> bool {
        now < self.display_until
    }
}
