//! Age-verification kiosk - headless monitoring service
//!
//! Polls a camera snapshot endpoint, detects faces, and sends presentable
//! faces to an age-estimation backend. Results are logged, written to the
//! scan log and exposed through Prometheus.
//!
//! Module structure:
//! - `domain/` - Core types (Detection, FaceKey, AgeResult) and ports
//! - `io/` - External interfaces (camera, detector, estimator, scan log)
//! - `services/` - Monitoring engine and its state machines
//! - `infra/` - Infrastructure (Config, Metrics)

use age_kiosk::infra::{Config, Metrics};
use age_kiosk::io::{
    HttpAgeEstimator, HttpDetector, LogKioskDisplay, LogOverlayRenderer, ScanLog, SnapshotCamera,
};
use age_kiosk::services::{EngineEvent, MonitoringEngine};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Age-verification kiosk monitoring loop
#[derive(Parser, Debug)]
#[command(name = "age-kiosk", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides; default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "age-kiosk starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    let monitoring = config.monitoring();

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        camera_url = %config.camera_snapshot_url(),
        detector_url = %config.detector_url(),
        analysis_url = %config.analysis_url(),
        min_face_width = %monitoring.min_face_width,
        max_face_width = %monitoring.max_face_width,
        capture_delay_ms = %monitoring.capture_delay_ms,
        cooldown_ms = %monitoring.cooldown_ms,
        averaging = %monitoring.averaging_enabled,
        kiosk = %monitoring.kiosk_enabled,
        age_gate = %monitoring.age_gate_enabled,
        recognition = %config.recognition().enabled,
        adaptive = %config.adaptive().enabled,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Camera snapshot poller
    let camera_poll = Duration::from_millis(config.camera_poll_interval_ms());
    let camera = Arc::new(SnapshotCamera::for_poll_interval(camera_poll));
    let camera_task = camera.clone();
    let camera_url = config.camera_snapshot_url().to_string();
    let camera_timeout = Duration::from_millis(config.camera_timeout_ms());
    let camera_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        camera_task.run(camera_url, camera_poll, camera_timeout, camera_shutdown).await;
    });

    let detector = HttpDetector::new(
        config.detector_url(),
        Duration::from_millis(config.detector_timeout_ms()),
    )
    .context("Failed to build detector client")?;
    let estimator = HttpAgeEstimator::new(
        config.analysis_url(),
        Duration::from_millis(config.analysis_timeout_ms()),
        config.analysis_api_key(),
    )
    .context("Failed to build analysis client")?;

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = age_kiosk::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "prometheus_server_error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Engine events are only logged by the headless service
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                EngineEvent::CaptureFailed { error } => warn!(error = %error, "ui_capture_failed"),
                EngineEvent::AveragingAborted { error } => warn!(error = %error, "ui_averaging_aborted"),
                EngineEvent::SampleCollected { collected, target, age } => {
                    info!(collected = %collected, target = %target, age = %age, "ui_averaging_progress")
                }
                _ => {}
            }
        }
    });

    let mut builder = MonitoringEngine::builder()
        .config(monitoring)
        .recognition(config.recognition().clone())
        .adaptive(config.adaptive().clone())
        .detector(Arc::new(detector))
        .analysis(Arc::new(estimator))
        .frames(camera)
        .renderer(Arc::new(LogOverlayRenderer::new()))
        .display(Arc::new(LogKioskDisplay::new()))
        .metrics(metrics)
        .events(event_tx);
    if config.scan_log_enabled() {
        builder = builder.scan_log(ScanLog::new(config.scan_log_file(), config.site_id()));
    }
    let mut engine = builder.build().context("Failed to build monitoring engine")?;

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    engine.run(shutdown_rx).await;

    info!("age-kiosk shutdown complete");
    Ok(())
}
