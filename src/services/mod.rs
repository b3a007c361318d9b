//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Monitoring engine, the single owner of kiosk state
//! - `proximity` - Face distance/stability state machine
//! - `capture` - Single-flight capture lock and cooldown
//! - `averaging` - Multi-sample age averaging sessions
//! - `result_cache` - Per-face results and their display lifecycle
//! - `kiosk` - Idle/live display coordination
//! - `recognition` - Descriptor cache for recently analyzed faces
//! - `adaptive_interval` - Tick rate that follows face presence
//! - `overlay` - Draw instructions for the overlay renderer

pub mod adaptive_interval;
pub mod averaging;
pub mod capture;
pub mod engine;
pub mod kiosk;
pub mod overlay;
pub mod proximity;
pub mod recognition;
pub mod result_cache;

// Re-export commonly used types
pub use engine::{EngineEvent, MonitoringEngine, MonitoringEngineBuilder};
pub use kiosk::KioskView;
pub use proximity::ProximityStatus;
