//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `camera` - HTTP snapshot poller acting as the live frame source
//! - `detector_client` - HTTP face detector
//! - `analysis_client` - HTTP age-estimation backend
//! - `display` - logging overlay and kiosk sinks
//! - `scan_log` - result output to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod analysis_client;
pub mod camera;
pub mod detector_client;
pub mod display;
pub mod prometheus;
pub mod scan_log;

// Re-export commonly used types
pub use analysis_client::HttpAgeEstimator;
pub use camera::SnapshotCamera;
pub use detector_client::HttpDetector;
pub use display::{LogKioskDisplay, LogOverlayRenderer};
pub use scan_log::ScanLog;
