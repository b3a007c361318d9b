//! Detector output types

use serde::{Deserialize, Serialize};

/// Axis-aligned face box in source-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Center point, used for recognition position matching
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Flip horizontally within a frame of the given width (selfie view)
    pub fn mirrored(&self, frame_width: f32) -> Self {
        Self { x: frame_width - self.x - self.width, ..*self }
    }
}

/// Frame dimensions the detector boxes are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A single face produced by the external detector for one tick.
///
/// Not persisted; a fresh list arrives every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Recognition embedding, when the detector computes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Vec<f32>>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence, descriptor: None }
    }

    pub fn with_descriptor(mut self, descriptor: Vec<f32>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.bbox.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrored_box() {
        let bbox = BoundingBox::new(100.0, 50.0, 200.0, 220.0);
        let flipped = bbox.mirrored(640.0);
        assert_eq!(flipped.x, 340.0);
        assert_eq!(flipped.y, 50.0);
        assert_eq!(flipped.width, 200.0);
    }

    #[test]
    fn test_detection_json_uses_box_field() {
        let json = r#"{"box":{"x":1.0,"y":2.0,"width":3.0,"height":4.0},"confidence":0.9}"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.bbox.height, 4.0);
        assert!(detection.descriptor.is_none());
    }

    #[test]
    fn test_empty_geometry() {
        assert!(FrameGeometry::new(0, 480).is_empty());
        assert!(!FrameGeometry::new(640, 480).is_empty());
    }
}
