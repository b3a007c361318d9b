//! Domain models - core kiosk types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Detection` / `BoundingBox` - faces reported by the detector each tick
//! - `FaceKey` - position-quantized pseudo-identity for a face
//! - `AgeResult` - a displayed estimate and its lifecycle timestamps
//! - `Frame` - a captured still handed to detector and estimator
//! - error enums for every failure the loop tolerates
//! - `ports` - traits for the detector, estimator, video source and sinks

pub mod detection;
pub mod errors;
pub mod face_key;
pub mod ports;
pub mod result;

// Re-export commonly used types at module level
pub use detection::{BoundingBox, Detection, FrameGeometry};
pub use errors::{AnalysisError, CaptureError, DetectorError, EngineError, SamplerError};
pub use face_key::{FaceKey, FaceKeyer, GridFaceKeyer};
pub use ports::{
    AnalysisService, Color, DrawInstruction, FaceDetector, FrameSource, KioskDisplay,
    OverlayRenderer,
};
pub use result::{AgeEstimate, AgeGate, AgeResult, AgeStatistics, Frame, ResultKind};
