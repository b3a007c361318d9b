//! Kiosk simulation - scripted visitors without camera or backends
//!
//! Runs the full monitoring engine against a scripted face detector and a
//! fake age estimator. Useful for checking timing (capture delay, cooldown,
//! averaging, kiosk idle return) from the logs.
//!
//! Scenario (seconds from start):
//! - 0-2: empty
//! - 2-3: visitor far from the camera
//! - 3-9: visitor in range
//! - 9-12: empty
//! - 12-18: the same visitor returns
//! - 18+: empty
//!
//! Usage:
//!   cargo run --bin kiosk-sim -- --config config/dev.toml --averaging

use age_kiosk::domain::{
    AgeEstimate, AnalysisError, AnalysisService, BoundingBox, CaptureError, Detection,
    DetectorError, FaceDetector, Frame, FrameGeometry, FrameSource,
};
use age_kiosk::infra::{Config, Metrics};
use age_kiosk::io::{LogKioskDisplay, LogOverlayRenderer};
use age_kiosk::services::{EngineEvent, MonitoringEngine};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

#[derive(Parser, Debug)]
#[command(name = "kiosk-sim")]
#[command(about = "Scripted kiosk simulation for local testing")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Force multi-sample averaging on
    #[arg(long)]
    averaging: bool,

    /// Force the recognition cache on
    #[arg(long)]
    recognition: bool,

    /// Base age returned by the fake estimator
    #[arg(long, default_value_t = 27.0)]
    age: f32,

    /// Simulated estimator latency
    #[arg(long, default_value_t = 300)]
    latency_ms: u64,

    /// Total run time
    #[arg(long, default_value_t = 24)]
    duration_secs: u64,
}

/// Always-ready frame source with a placeholder still
struct StaticFrames;

impl FrameSource for StaticFrames {
    fn current_frame(&self) -> Result<Frame, CaptureError> {
        Ok(Frame::new(Bytes::from_static(b"sim-frame"), self.geometry().ok_or(CaptureError::NotReady)?))
    }

    fn geometry(&self) -> Option<FrameGeometry> {
        Some(FrameGeometry::new(FRAME_WIDTH, FRAME_HEIGHT))
    }
}

/// Detector that plays the visitor scenario against wall-clock time
struct ScriptedDetector {
    started: Instant,
}

impl ScriptedDetector {
    fn visitor(width: f32) -> Detection {
        let x = (FRAME_WIDTH as f32 - width) / 2.0;
        Detection::new(BoundingBox::new(x, 120.0, width, width * 1.1), 0.93)
            .with_descriptor(vec![0.12, 0.48, 0.33, 0.91])
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let t = self.started.elapsed().as_secs_f32();
        let faces = match t {
            t if t < 2.0 => vec![],
            t if t < 3.0 => vec![Self::visitor(110.0)],
            t if t < 9.0 => vec![Self::visitor(220.0)],
            t if t < 12.0 => vec![],
            t if t < 18.0 => vec![Self::visitor(230.0)],
            _ => vec![],
        };
        Ok(faces)
    }
}

/// Estimator returning the base age with a small deterministic wobble
struct FakeEstimator {
    base_age: f32,
    latency: Duration,
    calls: AtomicU32,
}

#[async_trait]
impl AnalysisService for FakeEstimator {
    async fn estimate_age(&self, _frame: &Frame) -> Result<AgeEstimate, AnalysisError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        let wobble = (n % 5) as f32 - 2.0;
        Ok(AgeEstimate { age: self.base_age + wobble })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let mut monitoring = config.monitoring();
    if args.averaging {
        monitoring.averaging_enabled = true;
    }
    let mut recognition = config.recognition().clone();
    if args.recognition {
        recognition.enabled = true;
    }

    info!(
        averaging = %monitoring.averaging_enabled,
        recognition = %recognition.enabled,
        duration_secs = %args.duration_secs,
        "simulation_starting"
    );

    let metrics = Arc::new(Metrics::new());
    let estimator = Arc::new(FakeEstimator {
        base_age: args.age,
        latency: Duration::from_millis(args.latency_ms),
        calls: AtomicU32::new(0),
    });
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut engine = MonitoringEngine::builder()
        .config(monitoring)
        .recognition(recognition)
        .adaptive(config.adaptive().clone())
        .detector(Arc::new(ScriptedDetector { started: Instant::now() }))
        .analysis(estimator.clone())
        .frames(Arc::new(StaticFrames))
        .renderer(Arc::new(LogOverlayRenderer::new()))
        .display(Arc::new(LogKioskDisplay::new()))
        .metrics(metrics.clone())
        .events(event_tx)
        .build()
        .context("Failed to build monitoring engine")?;

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                EngineEvent::ResultProduced { face_key, age, passed, kind } => {
                    info!(face_key = %face_key, age = %age, passed = ?passed, kind = %kind.as_str(), "sim_result")
                }
                EngineEvent::CaptureFailed { error } => warn!(error = %error, "sim_capture_failed"),
                EngineEvent::AveragingAborted { error } => warn!(error = %error, "sim_averaging_aborted"),
                other => info!(event = ?other, "sim_event"),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let duration = Duration::from_secs(args.duration_secs);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => info!("simulation_finished"),
            _ = tokio::signal::ctrl_c() => info!("shutdown_signal_received"),
        }
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await;

    metrics.report().log();
    info!(estimator_calls = %estimator.calls.load(Ordering::Relaxed), "simulation_complete");
    Ok(())
}
