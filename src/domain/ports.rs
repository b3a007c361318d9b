//! Interfaces to the collaborators the monitoring loop drives
//!
//! The engine receives implementations through its builder. Detection and
//! analysis are async; frame access and the two sinks are synchronous and
//! must not block.

use crate::domain::detection::{BoundingBox, Detection, FrameGeometry};
use crate::domain::errors::{AnalysisError, CaptureError, DetectorError};
use crate::domain::result::{AgeEstimate, Frame};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Face detector. The confidence threshold is applied by the caller.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Age-estimation backend (local model or remote service)
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// `AnalysisError::NoFaceFound` when the image has no usable face
    async fn estimate_age(&self, frame: &Frame) -> Result<AgeEstimate, AnalysisError>;
}

/// Live video source
pub trait FrameSource: Send + Sync {
    /// Latest frame. Fails fast with `CaptureError::NotReady` until the
    /// source knows its dimensions.
    fn current_frame(&self) -> Result<Frame, CaptureError>;

    /// Frame dimensions, once known
    fn geometry(&self) -> Option<FrameGeometry>;
}

/// RGB overlay color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const PASS: Color = Color(0x4C, 0xAF, 0x50);
    pub const FAIL: Color = Color(0xF4, 0x43, 0x36);
    pub const CHECKED: Color = Color(0x21, 0x96, 0xF3);
    pub const IN_RANGE: Color = Color(0xFF, 0xA5, 0x00);
    pub const TOO_FAR: Color = Color(0x88, 0x88, 0x88);
    pub const TOO_CLOSE: Color = Color(0xFF, 0x98, 0x00);
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One box to draw on top of the live view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawInstruction {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub color: Color,
    pub label: String,
    pub opacity: f32,
}

/// Overlay sink, called once per tick
pub trait OverlayRenderer: Send + Sync {
    fn render(&self, instructions: &[DrawInstruction]);
}

/// Idle (advertising) content sink
pub trait KioskDisplay: Send + Sync {
    /// Show idle content over the live view
    fn show(&self);
    /// Hide idle content, revealing the live view
    fn hide(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_hex() {
        assert_eq!(Color::PASS.to_string(), "#4caf50");
        assert_eq!(Color::FAIL.to_string(), "#f44336");
        assert_eq!(Color::TOO_FAR.to_string(), "#888888");
    }
}
