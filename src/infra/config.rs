//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::errors::EngineError;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tokio::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique kiosk identifier (e.g., "store-12-door")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "kiosk".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringSection {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Narrowest face box accepted as "close enough" (pixels)
    #[serde(default = "default_min_face_width")]
    pub min_face_width: f32,
    /// Widest face box accepted before "too close" (pixels)
    #[serde(default = "default_max_face_width")]
    pub max_face_width: f32,
    #[serde(default = "default_capture_delay_ms")]
    pub capture_delay_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Grid cell size for face keys (pixels)
    #[serde(default = "default_face_key_cell")]
    pub face_key_cell: u32,
    /// Camera shows a mirrored (selfie) view
    #[serde(default = "default_true")]
    pub mirror: bool,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            min_face_width: default_min_face_width(),
            max_face_width: default_max_face_width(),
            capture_delay_ms: default_capture_delay_ms(),
            cooldown_ms: default_cooldown_ms(),
            min_confidence: default_min_confidence(),
            face_key_cell: default_face_key_cell(),
            mirror: true,
        }
    }
}

fn default_check_interval_ms() -> u64 {
    100
}

fn default_min_face_width() -> f32 {
    150.0
}

fn default_max_face_width() -> f32 {
    350.0
}

fn default_capture_delay_ms() -> u64 {
    500
}

fn default_cooldown_ms() -> u64 {
    5000
}

fn default_min_confidence() -> f32 {
    0.7
}

fn default_face_key_cell() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AveragingSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_samples_to_average")]
    pub samples_to_average: u32,
    /// Pause after an accepted sample
    #[serde(default = "default_sample_delay_ms")]
    pub sample_delay_ms: u64,
    /// Pause before each capture attempt
    #[serde(default = "default_sample_settle_ms")]
    pub sample_settle_ms: u64,
    /// Pause before retrying a sample that found no face
    #[serde(default = "default_sample_retry_delay_ms")]
    pub sample_retry_delay_ms: u64,
    /// Consecutive no-face attempts before aborting (0 = unlimited)
    #[serde(default)]
    pub max_sample_retries: u32,
}

impl Default for AveragingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            samples_to_average: default_samples_to_average(),
            sample_delay_ms: default_sample_delay_ms(),
            sample_settle_ms: default_sample_settle_ms(),
            sample_retry_delay_ms: default_sample_retry_delay_ms(),
            max_sample_retries: 0,
        }
    }
}

fn default_samples_to_average() -> u32 {
    5
}

fn default_sample_delay_ms() -> u64 {
    1000
}

fn default_sample_settle_ms() -> u64 {
    500
}

fn default_sample_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplaySection {
    /// Guaranteed display window for fresh and cached results
    #[serde(default = "default_min_display_ms")]
    pub min_display_ms: u64,
    /// Display window for averaged results
    #[serde(default = "default_long_display_ms")]
    pub long_display_ms: u64,
    /// Results older than this are purged once their display window ends
    #[serde(default = "default_max_result_age_ms")]
    pub max_result_age_ms: u64,
    /// Opacity gained per tick while a face stays detected
    #[serde(default = "default_fade_step")]
    pub fade_step: f32,
    /// Show the numeric age, not just PASS/FAIL
    #[serde(default = "default_true")]
    pub show_age: bool,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            min_display_ms: default_min_display_ms(),
            long_display_ms: default_long_display_ms(),
            max_result_age_ms: default_max_result_age_ms(),
            fade_step: default_fade_step(),
            show_age: true,
        }
    }
}

fn default_min_display_ms() -> u64 {
    500
}

fn default_long_display_ms() -> u64 {
    5000
}

fn default_max_result_age_ms() -> u64 {
    5000
}

fn default_fade_step() -> f32 {
    0.1
}

#[derive(Debug, Clone, Deserialize)]
pub struct KioskSection {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds after the last result before the idle content returns
    #[serde(default = "default_kiosk_display_time_sec")]
    pub display_time_sec: u64,
}

impl Default for KioskSection {
    fn default() -> Self {
        Self { enabled: false, display_time_sec: default_kiosk_display_time_sec() }
    }
}

fn default_kiosk_display_time_sec() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgeGateSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_minimum_age")]
    pub minimum_age: u32,
}

impl Default for AgeGateSection {
    fn default() -> Self {
        Self { enabled: false, minimum_age: default_minimum_age() }
    }
}

fn default_minimum_age() -> u32 {
    21
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionSection {
    #[serde(default)]
    pub enabled: bool,
    /// Max euclidean descriptor distance for a match
    #[serde(default = "default_descriptor_threshold")]
    pub descriptor_threshold: f32,
    /// Max center movement between sightings (pixels)
    #[serde(default = "default_position_threshold")]
    pub position_threshold: f32,
    #[serde(default = "default_recognition_max_size")]
    pub max_size: usize,
    /// Detections below this confidence are never matched
    #[serde(default = "default_min_quality")]
    pub min_quality: f32,
    #[serde(default = "default_recognition_expiration_secs")]
    pub expiration_secs: u64,
}

impl Default for RecognitionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            descriptor_threshold: default_descriptor_threshold(),
            position_threshold: default_position_threshold(),
            max_size: default_recognition_max_size(),
            min_quality: default_min_quality(),
            expiration_secs: default_recognition_expiration_secs(),
        }
    }
}

fn default_descriptor_threshold() -> f32 {
    0.4
}

fn default_position_threshold() -> f32 {
    150.0
}

fn default_recognition_max_size() -> usize {
    10
}

fn default_min_quality() -> f32 {
    0.85
}

fn default_recognition_expiration_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_adaptive_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_adaptive_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Empty ticks before slowing down
    #[serde(default = "default_no_face_threshold")]
    pub no_face_threshold: u32,
    /// Face ticks before speeding up
    #[serde(default = "default_face_frames")]
    pub face_frames: u32,
    #[serde(default = "default_transition_step_ms")]
    pub transition_step_ms: u64,
    #[serde(default = "default_true")]
    pub smoothing: bool,
}

impl Default for AdaptiveSection {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_ms: default_adaptive_min_interval_ms(),
            max_interval_ms: default_adaptive_max_interval_ms(),
            no_face_threshold: default_no_face_threshold(),
            face_frames: default_face_frames(),
            transition_step_ms: default_transition_step_ms(),
            smoothing: true,
        }
    }
}

fn default_adaptive_min_interval_ms() -> u64 {
    100
}

fn default_adaptive_max_interval_ms() -> u64 {
    1000
}

fn default_no_face_threshold() -> u32 {
    3
}

fn default_face_frames() -> u32 {
    1
}

fn default_transition_step_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraSection {
    /// HTTP snapshot endpoint returning a JPEG still
    #[serde(default = "default_camera_snapshot_url")]
    pub snapshot_url: String,
    #[serde(default = "default_camera_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            snapshot_url: default_camera_snapshot_url(),
            poll_interval_ms: default_camera_poll_interval_ms(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

fn default_camera_snapshot_url() -> String {
    "http://127.0.0.1:8081/snapshot.jpg".to_string()
}

fn default_camera_poll_interval_ms() -> u64 {
    100
}

fn default_http_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSection {
    #[serde(default = "default_detector_url")]
    pub url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self { url: default_detector_url(), timeout_ms: default_http_timeout_ms() }
    }
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8090/detect".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSection {
    #[serde(default = "default_analysis_url")]
    pub url: String,
    #[serde(default = "default_analysis_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self { url: default_analysis_url(), timeout_ms: default_analysis_timeout_ms(), api_key: None }
    }
}

fn default_analysis_url() -> String {
    "http://127.0.0.1:8090/estimate-age".to_string()
}

fn default_analysis_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanLogSection {
    #[serde(default)]
    pub enabled: bool,
    /// File path for scan records (JSONL format)
    #[serde(default = "default_scan_log_file")]
    pub file: String,
}

impl Default for ScanLogSection {
    fn default() -> Self {
        Self { enabled: false, file: default_scan_log_file() }
    }
}

fn default_scan_log_file() -> String {
    "scans.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9102
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub monitoring: MonitoringSection,
    #[serde(default)]
    pub averaging: AveragingSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub kiosk: KioskSection,
    #[serde(default)]
    pub age_gate: AgeGateSection,
    #[serde(default)]
    pub recognition: RecognitionSection,
    #[serde(default)]
    pub adaptive: AdaptiveSection,
    #[serde(default)]
    pub camera: CameraSection,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub scan_log: ScanLogSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Immutable per-session settings consumed by the monitoring engine
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig {
    pub check_interval_ms: u64,
    pub min_face_width: f32,
    pub max_face_width: f32,
    pub capture_delay_ms: u64,
    pub cooldown_ms: u64,
    pub min_confidence: f32,
    pub averaging_enabled: bool,
    pub samples_to_average: u32,
    pub sample_delay_ms: u64,
    pub sample_settle_ms: u64,
    pub sample_retry_delay_ms: u64,
    pub max_sample_retries: u32,
    pub kiosk_enabled: bool,
    pub kiosk_display_time_sec: u64,
    pub min_display_ms: u64,
    pub long_display_ms: u64,
    pub max_result_age_ms: u64,
    pub fade_step: f32,
    pub show_age: bool,
    pub age_gate_enabled: bool,
    pub minimum_age: u32,
    pub face_key_cell: u32,
    pub mirror: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Config::default().monitoring()
    }
}

impl MonitoringConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min_face_width > self.max_face_width {
            return Err(EngineError::InvalidConfig(format!(
                "min_face_width {} exceeds max_face_width {}",
                self.min_face_width, self.max_face_width
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(EngineError::InvalidConfig(format!(
                "min_confidence {} outside [0, 1]",
                self.min_confidence
            )));
        }
        if self.averaging_enabled && self.samples_to_average == 0 {
            return Err(EngineError::InvalidConfig(
                "samples_to_average must be at least 1".to_string(),
            ));
        }
        if self.check_interval_ms == 0 {
            return Err(EngineError::InvalidConfig("check_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn min_display(&self) -> Duration {
        Duration::from_millis(self.min_display_ms)
    }

    pub fn long_display(&self) -> Duration {
        Duration::from_millis(self.long_display_ms)
    }

    pub fn max_result_age(&self) -> Duration {
        Duration::from_millis(self.max_result_age_ms)
    }

    pub fn kiosk_display_time(&self) -> Duration {
        Duration::from_secs(self.kiosk_display_time_sec)
    }
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    config_file: String,
    monitoring: MonitoringSection,
    averaging: AveragingSection,
    display: DisplaySection,
    kiosk: KioskSection,
    age_gate: AgeGateSection,
    recognition: RecognitionSection,
    adaptive: AdaptiveSection,
    camera: CameraSection,
    detector: DetectorSection,
    analysis: AnalysisSection,
    scan_log: ScanLogSection,
    metrics: MetricsSection,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            config_file,
            monitoring: toml_config.monitoring,
            averaging: toml_config.averaging,
            display: toml_config.display,
            kiosk: toml_config.kiosk,
            age_gate: toml_config.age_gate,
            recognition: toml_config.recognition,
            adaptive: toml_config.adaptive,
            camera: toml_config.camera,
            detector: toml_config.detector,
            analysis: toml_config.analysis,
            scan_log: toml_config.scan_log,
            metrics: toml_config.metrics,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - resolves the path from args/env first
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    /// Build the immutable session config for the engine
    pub fn monitoring(&self) -> MonitoringConfig {
        MonitoringConfig {
            check_interval_ms: self.monitoring.check_interval_ms,
            min_face_width: self.monitoring.min_face_width,
            max_face_width: self.monitoring.max_face_width,
            capture_delay_ms: self.monitoring.capture_delay_ms,
            cooldown_ms: self.monitoring.cooldown_ms,
            min_confidence: self.monitoring.min_confidence,
            averaging_enabled: self.averaging.enabled,
            samples_to_average: self.averaging.samples_to_average,
            sample_delay_ms: self.averaging.sample_delay_ms,
            sample_settle_ms: self.averaging.sample_settle_ms,
            sample_retry_delay_ms: self.averaging.sample_retry_delay_ms,
            max_sample_retries: self.averaging.max_sample_retries,
            kiosk_enabled: self.kiosk.enabled,
            kiosk_display_time_sec: self.kiosk.display_time_sec,
            min_display_ms: self.display.min_display_ms,
            long_display_ms: self.display.long_display_ms,
            max_result_age_ms: self.display.max_result_age_ms,
            fade_step: self.display.fade_step,
            show_age: self.display.show_age,
            age_gate_enabled: self.age_gate.enabled,
            minimum_age: self.age_gate.minimum_age,
            face_key_cell: self.monitoring.face_key_cell,
            mirror: self.monitoring.mirror,
        }
    }

    // Getters
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn recognition(&self) -> &RecognitionSection {
        &self.recognition
    }

    pub fn adaptive(&self) -> &AdaptiveSection {
        &self.adaptive
    }

    pub fn camera_snapshot_url(&self) -> &str {
        &self.camera.snapshot_url
    }

    pub fn camera_poll_interval_ms(&self) -> u64 {
        self.camera.poll_interval_ms
    }

    pub fn camera_timeout_ms(&self) -> u64 {
        self.camera.timeout_ms
    }

    pub fn detector_url(&self) -> &str {
        &self.detector.url
    }

    pub fn detector_timeout_ms(&self) -> u64 {
        self.detector.timeout_ms
    }

    pub fn analysis_url(&self) -> &str {
        &self.analysis.url
    }

    pub fn analysis_timeout_ms(&self) -> u64 {
        self.analysis.timeout_ms
    }

    pub fn analysis_api_key(&self) -> Option<&str> {
        self.analysis.api_key.as_deref()
    }

    pub fn scan_log_enabled(&self) -> bool {
        self.scan_log.enabled
    }

    pub fn scan_log_file(&self) -> &str {
        &self.scan_log.file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics.interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.metrics.prometheus_port
    }
}
