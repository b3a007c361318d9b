//! Position-quantized face pseudo-identity
//!
//! A `FaceKey` associates a result with "the face at roughly this spot" across
//! consecutive ticks. It is not identity: two people in the same cell collide
//! and fast motion changes the key. Everything that needs a key goes through
//! the `FaceKeyer` trait so a real tracker can replace the grid.

use crate::domain::detection::{BoundingBox, Detection, FrameGeometry};
use serde::{Serialize, Serializer};
use std::fmt;

/// Default grid cell size in pixels
pub const DEFAULT_CELL_SIZE: u32 = 20;

/// Half-size of the box drawn for a result whose face is no longer detected
const ESTIMATED_HALF_SIZE: f32 = 50.0;

/// Snapped (mirrored) position of a face, rendered as `"{x}_{y}"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceKey {
    pub x: i32,
    pub y: i32,
}

impl FaceKey {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for FaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.y)
    }
}

impl Serialize for FaceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for FaceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s.split_once('_').ok_or_else(|| format!("invalid face key: {s}"))?;
        let x = x.parse::<i32>().map_err(|e| format!("invalid face key x: {e}"))?;
        let y = y.parse::<i32>().map_err(|e| format!("invalid face key y: {e}"))?;
        Ok(Self { x, y })
    }
}

/// Strategy for deriving pseudo-identities from detections
pub trait FaceKeyer: Send + Sync {
    /// Key for a detection in a frame of the given geometry
    fn key_for(&self, detection: &Detection, frame: FrameGeometry) -> FaceKey;

    /// Display box for a key whose face is not currently detected
    fn estimated_box(&self, key: &FaceKey) -> BoundingBox;
}

/// Snaps the mirrored top-left corner to the nearest grid point
#[derive(Debug, Clone)]
pub struct GridFaceKeyer {
    cell: f32,
    mirror: bool,
}

impl GridFaceKeyer {
    pub fn new(cell: u32, mirror: bool) -> Self {
        Self { cell: cell.max(1) as f32, mirror }
    }

    fn snap(&self, value: f32) -> i32 {
        ((value / self.cell).round() * self.cell) as i32
    }
}

impl Default for GridFaceKeyer {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE, true)
    }
}

impl FaceKeyer for GridFaceKeyer {
    fn key_for(&self, detection: &Detection, frame: FrameGeometry) -> FaceKey {
        let bbox = if self.mirror {
            detection.bbox.mirrored(frame.width as f32)
        } else {
            detection.bbox
        };
        FaceKey::new(self.snap(bbox.x), self.snap(bbox.y))
    }

    fn estimated_box(&self, key: &FaceKey) -> BoundingBox {
        BoundingBox::new(
            key.x as f32 - ESTIMATED_HALF_SIZE,
            key.y as f32 - ESTIMATED_HALF_SIZE,
            ESTIMATED_HALF_SIZE * 2.0,
            ESTIMATED_HALF_SIZE * 2.0,
        )
    }
}
