//! Monitoring engine
//!
//! The engine is the single owner of all kiosk state. It coordinates:
//! - Proximity gating of the primary face
//! - Single captures and averaging sessions (single-flight + cooldown)
//! - The per-face result cache and overlay drawing
//! - The idle/kiosk display
//! - The recognition cache, scan log and metrics
//!
//! Capture jobs run as spawned tasks and report back over a channel; every
//! state change happens on the task that owns the engine.

mod handlers;

use crate::domain::{
    AgeEstimate, AgeGate, AgeResult, AgeStatistics, AnalysisError, AnalysisService, Detection, EngineError,
    FaceDetector, FaceKey, FaceKeyer, Frame, FrameGeometry, FrameSource, GridFaceKeyer,
    KioskDisplay, OverlayRenderer, ResultKind, SamplerError,
};
use crate::infra::config::{AdaptiveSection, MonitoringConfig, RecognitionSection};
use crate::infra::metrics::Metrics;
use crate::io::scan_log::ScanLog;
use crate::services::adaptive_interval::AdaptiveInterval;
use crate::services::averaging::{AveragingSampler, AveragingSession, SampleProgress, SamplerSettings};
use crate::services::capture::{CaptureCoordinator, CaptureLock, TriggerDecision};
use crate::services::kiosk::{KioskCoordinator, KioskView};
use crate::services::overlay::{OverlayBuilder, OverlayFace};
use crate::services::proximity::{ProximityReading, ProximityStatus, ProximityTracker};
use crate::services::recognition::RecognitionCache;
use crate::services::result_cache::ResultCache;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

/// Notifications for whatever sits on top of the engine (UI, simulator)
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ResultProduced { face_key: FaceKey, age: u32, passed: Option<bool>, kind: ResultKind },
    CaptureTriggered { face_key: FaceKey, averaging: bool },
    CaptureFailed { error: EngineError },
    SampleCollected { collected: usize, target: u32, age: u32 },
    AveragingAborted { error: EngineError },
    ViewChanged(KioskView),
}

/// Completion reported by a spawned capture job
#[derive(Debug)]
pub(crate) enum JobOutcome {
    Analysis {
        generation: u64,
        face_key: FaceKey,
        detection: Detection,
        result: Result<AgeEstimate, AnalysisError>,
        latency_ms: u64,
    },
    Sample {
        generation: u64,
        progress: SampleProgress,
    },
    AveragingFinished {
        generation: u64,
        result: Result<AgeStatistics, SamplerError>,
    },
}

pub struct MonitoringEngine {
    pub(crate) config: MonitoringConfig,
    pub(crate) proximity: ProximityTracker,
    pub(crate) capture: CaptureCoordinator,
    pub(crate) averaging: Option<AveragingSession>,
    pub(crate) results: ResultCache,
    pub(crate) kiosk: KioskCoordinator,
    pub(crate) recognition: Option<RecognitionCache>,
    pub(crate) adaptive: AdaptiveInterval,
    pub(crate) overlay: OverlayBuilder,
    pub(crate) age_gate: AgeGate,
    pub(crate) keyer: Arc<dyn FaceKeyer>,
    pub(crate) detector: Arc<dyn FaceDetector>,
    pub(crate) analysis: Arc<dyn AnalysisService>,
    pub(crate) frames: Arc<dyn FrameSource>,
    pub(crate) renderer: Arc<dyn OverlayRenderer>,
    pub(crate) display: Arc<dyn KioskDisplay>,
    pub(crate) sampler: AveragingSampler,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) scan_log: Option<ScanLog>,
    pub(crate) events: Option<mpsc::UnboundedSender<EngineEvent>>,
    pub(crate) jobs_tx: mpsc::UnboundedSender<JobOutcome>,
    pub(crate) jobs_rx: Option<mpsc::UnboundedReceiver<JobOutcome>>,
    /// Cancellation token of the running averaging session
    pub(crate) cancel: Option<watch::Sender<bool>>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    pub(crate) running: bool,
}

/// Collects collaborators and settings for a `MonitoringEngine`
#[derive(Default)]
pub struct MonitoringEngineBuilder {
    config: Option<MonitoringConfig>,
    recognition: Option<RecognitionSection>,
    adaptive: Option<AdaptiveSection>,
    keyer: Option<Arc<dyn FaceKeyer>>,
    detector: Option<Arc<dyn FaceDetector>>,
    analysis: Option<Arc<dyn AnalysisService>>,
    frames: Option<Arc<dyn FrameSource>>,
    renderer: Option<Arc<dyn OverlayRenderer>>,
    display: Option<Arc<dyn KioskDisplay>>,
    metrics: Option<Arc<Metrics>>,
    scan_log: Option<ScanLog>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl MonitoringEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: MonitoringConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Enables the recognition cache when `section.enabled` is set
    pub fn recognition(mut self, section: RecognitionSection) -> Self {
        self.recognition = Some(section);
        self
    }

    pub fn adaptive(mut self, section: AdaptiveSection) -> Self {
        self.adaptive = Some(section);
        self
    }

    pub fn keyer(mut self, keyer: Arc<dyn FaceKeyer>) -> Self {
        self.keyer = Some(keyer);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn analysis(mut self, analysis: Arc<dyn AnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn frames(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn OverlayRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn display(mut self, display: Arc<dyn KioskDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn scan_log(mut self, scan_log: ScanLog) -> Self {
        self.scan_log = Some(scan_log);
        self
    }

    pub fn events(mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<MonitoringEngine, EngineError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let detector = self.detector.ok_or(EngineError::MissingCollaborator("face detector"))?;
        let analysis = self.analysis.ok_or(EngineError::MissingCollaborator("analysis service"))?;
        let frames = self.frames.ok_or(EngineError::MissingCollaborator("frame source"))?;
        let renderer = self.renderer.ok_or(EngineError::MissingCollaborator("overlay renderer"))?;
        let display = self.display.ok_or(EngineError::MissingCollaborator("kiosk display"))?;

        let keyer = self
            .keyer
            .unwrap_or_else(|| Arc::new(GridFaceKeyer::new(config.face_key_cell, config.mirror)));
        let recognition = self.recognition.filter(|r| r.enabled).map(|r| RecognitionCache::new(&r));
        let adaptive = AdaptiveInterval::new(&self.adaptive.unwrap_or_default(), config.check_interval());
        let sampler = AveragingSampler::new(
            Arc::clone(&frames),
            Arc::clone(&analysis),
            SamplerSettings::from_config(&config),
        );
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        Ok(MonitoringEngine {
            proximity: ProximityTracker::new(&config),
            capture: CaptureCoordinator::new(config.cooldown(), config.averaging_enabled),
            averaging: None,
            results: ResultCache::new(config.fade_step, config.max_result_age()),
            kiosk: KioskCoordinator::new(config.kiosk_enabled, config.kiosk_display_time()),
            recognition,
            adaptive,
            overlay: OverlayBuilder::new(config.show_age, config.mirror),
            age_gate: AgeGate::new(config.age_gate_enabled, config.minimum_age),
            keyer,
            detector,
            analysis,
            frames,
            renderer,
            display,
            sampler,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(Metrics::new())),
            scan_log: self.scan_log,
            events: self.events,
            jobs_tx,
            jobs_rx: Some(jobs_rx),
            cancel: None,
            tasks: Vec::new(),
            running: false,
            config,
        })
    }
}

impl MonitoringEngine {
    pub fn builder() -> MonitoringEngineBuilder {
        MonitoringEngineBuilder::new()
    }

    /// Begin monitoring; the idle content shows until someone walks up
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!(
            interval_ms = %self.adaptive.current().as_millis(),
            averaging = %self.config.averaging_enabled,
            kiosk = %self.config.kiosk_enabled,
            "monitoring_started"
        );
        if let Some(view) = self.kiosk.start() {
            self.apply_view(view);
        }
    }

    /// Stop monitoring. Safe in any state: cancels in-flight jobs, drops the
    /// lock and any averaging session, clears cached results and shows idle.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.averaging.take().is_some() {
            self.metrics.record_averaging_aborted();
        }
        self.capture.reset();
        self.proximity.reset();
        self.results.clear();
        self.adaptive.reset();
        if let Some(recognition) = self.recognition.as_mut() {
            recognition.clear();
        }
        self.metrics.set_result_cache_size(0);

        // Outcomes already queued belong to a dead generation
        if let Some(rx) = self.jobs_rx.as_mut() {
            while rx.try_recv().is_ok() {}
        }

        if let Some(view) = self.kiosk.stop() {
            self.apply_view(view);
        }
        if self.running {
            info!("monitoring_stopped");
        }
        self.running = false;
    }

    /// Main loop: ticks on the adaptive interval and applies job outcomes
    /// until `shutdown` flips to true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut jobs_rx) = self.jobs_rx.take() else {
            warn!("engine_already_running");
            return;
        };
        self.start();
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                _ = sleep_until(next_tick) => {
                    let delay = self.tick().await;
                    next_tick = Instant::now() + delay;
                }
                Some(outcome) = jobs_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.jobs_rx = Some(jobs_rx);
        self.stop();
    }

    /// One monitoring pass. Returns the delay before the next tick.
    pub async fn tick(&mut self) -> Duration {
        if !self.running {
            return self.adaptive.current();
        }
        if self.capture.lock() == CaptureLock::Single {
            self.metrics.record_tick_skipped();
            return self.adaptive.current();
        }

        let (detections, geometry) = self.detect().await;
        let now = Instant::now();

        let view = if detections.is_empty() {
            self.kiosk.on_empty_tick(now)
        } else {
            self.kiosk.on_detection()
        };
        if let Some(view) = view {
            self.apply_view(view);
        }

        let reading = self.proximity.update(detections.first(), now);
        if let Some(primary) = detections.first() {
            if reading.capture_eligible {
                self.on_capture_eligible(primary, now);
            }
        }

        let keys: SmallVec<[FaceKey; 4]> =
            detections.iter().map(|d| self.keyer.key_for(d, geometry)).collect();
        let detected: FxHashSet<FaceKey> = keys.iter().copied().collect();
        let evicted = self.results.tick(now, &detected);
        self.metrics.record_evictions(evicted);

        self.draw(&detections, &keys, reading, geometry, now);

        if let Some(recognition) = self.recognition.as_mut() {
            recognition.cleanup(now);
        }

        self.metrics.record_tick(detections.len());
        self.metrics.set_result_cache_size(self.results.len());
        let delay = self.adaptive.update(detections.len());
        self.metrics.set_tick_interval_ms(delay.as_millis() as u64);
        delay
    }

    /// Frame, detector and confidence filter. Failures count as no faces.
    async fn detect(&mut self) -> (Vec<Detection>, FrameGeometry) {
        let frame = match self.frames.current_frame() {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "tick_frame_unavailable");
                let geometry = self.frames.geometry().unwrap_or(FrameGeometry::new(0, 0));
                return (Vec::new(), geometry);
            }
        };

        let geometry = frame.geometry;
        match self.detector.detect(&frame).await {
            Ok(mut detections) => {
                let min_confidence = self.config.min_confidence;
                detections.retain(|d| d.confidence >= min_confidence);
                (detections, geometry)
            }
            Err(e) => {
                self.metrics.record_detector_error();
                warn!(error = %e, "detector_failed");
                (Vec::new(), geometry)
            }
        }
    }

    /// Primary face has been in range long enough: reuse a recognized
    /// result or try to trigger a capture.
    fn on_capture_eligible(&mut self, primary: &Detection, now: Instant) {
        if !self.capture.evaluate(now).is_go() {
            return;
        }

        let hit = self.recognition.as_mut().and_then(|r| r.check(primary, now));
        if let Some(hit) = hit {
            let geometry = self.frames.geometry().unwrap_or(FrameGeometry::new(0, 0));
            let face_key = self.keyer.key_for(primary, geometry);
            self.metrics.record_recognition_hit();
            info!(face_key = %face_key, face_id = %hit.id, age = %hit.age, "recognized_face_skipping_analysis");

            self.proximity.reset();
            self.capture.start_cooldown(now);
            let result = AgeResult::new(
                face_key,
                hit.age,
                self.age_gate.evaluate(hit.age),
                ResultKind::Cached,
                now,
                self.config.min_display(),
            );
            self.store_result(result, now);
            return;
        }

        // Errors are already surfaced inside try_trigger
        let _ = self.try_trigger(primary, now);
    }

    /// Start a capture for `detection` if the lock and cooldown allow it.
    ///
    /// Returns the decision taken. An unready frame source fails fast before
    /// the lock is taken but still starts the cooldown.
    pub fn try_trigger(
        &mut self,
        detection: &Detection,
        now: Instant,
    ) -> Result<TriggerDecision, EngineError> {
        let decision = self.capture.evaluate(now);
        if !decision.is_go() {
            debug!(decision = ?decision, "trigger_rejected");
            return Ok(decision);
        }

        let frame = match self.frames.current_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.capture.start_cooldown(now);
                let error = EngineError::from(e);
                self.surface_capture_failure(&error);
                return Err(error);
            }
        };

        let Some(generation) = self.capture.acquire(decision, now) else {
            return Ok(decision);
        };
        self.proximity.reset();
        self.metrics.record_capture_triggered();

        let face_key = self.keyer.key_for(detection, frame.geometry);
        let averaging = decision == TriggerDecision::StartAveraging;
        info!(face_key = %face_key, generation = %generation, averaging = %averaging, "capture_triggered");
        self.emit(EngineEvent::CaptureTriggered { face_key, averaging });

        if averaging {
            self.averaging =
                Some(AveragingSession::new(face_key, self.config.samples_to_average, now));
            self.metrics.record_averaging_started();
            self.spawn_averaging(generation);
        } else {
            self.spawn_analysis(generation, face_key, detection.clone(), frame);
        }
        Ok(decision)
    }

    fn spawn_analysis(&mut self, generation: u64, face_key: FaceKey, detection: Detection, frame: Frame) {
        let analysis = Arc::clone(&self.analysis);
        let jobs = self.jobs_tx.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = analysis.estimate_age(&frame).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            let _ = jobs.send(JobOutcome::Analysis { generation, face_key, detection, result, latency_ms });
        });
        self.track_task(handle);
    }

    fn spawn_averaging(&mut self, generation: u64) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some(previous) = self.cancel.replace(cancel_tx) {
            let _ = previous.send(true);
        }

        let sampler = self.sampler.clone();
        let jobs = self.jobs_tx.clone();
        let handle = tokio::spawn(async move {
            let progress_jobs = jobs.clone();
            let result = sampler
                .run(cancel_rx, move |progress| {
                    let _ = progress_jobs.send(JobOutcome::Sample { generation, progress });
                })
                .await;
            let _ = jobs.send(JobOutcome::AveragingFinished { generation, result });
        });
        self.track_task(handle);
    }

    fn track_task(&mut self, handle: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(handle);
    }

    fn draw(
        &self,
        detections: &[Detection],
        keys: &[FaceKey],
        reading: ProximityReading,
        geometry: FrameGeometry,
        now: Instant,
    ) {
        let faces: Vec<OverlayFace<'_>> = detections
            .iter()
            .zip(keys)
            .enumerate()
            .map(|(i, (detection, &key))| {
                if i == 0 {
                    OverlayFace { detection, key, status: reading.status, remaining: Some(reading.remaining) }
                } else {
                    let status = self.proximity.classify(detection.width());
                    OverlayFace { detection, key, status, remaining: None }
                }
            })
            .collect();

        let instructions =
            self.overlay.build(&faces, &self.results, self.keyer.as_ref(), geometry, now);
        self.renderer.render(&instructions);
    }

    pub(crate) fn apply_view(&self, view: KioskView) {
        match view {
            KioskView::Idle => self.display.show(),
            KioskView::Live => self.display.hide(),
        }
        self.metrics.record_kiosk_transition(view == KioskView::Live);
        self.emit(EngineEvent::ViewChanged(view));
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(ref events) = self.events {
            let _ = events.send(event);
        }
    }

    /// Apply every outcome already queued. Returns how many were handled.
    pub fn drain_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Some(outcome) = self.jobs_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_outcome(outcome);
            handled += 1;
        }
        handled
    }

    /// Wait for the next job outcome and apply it. Returns false when no
    /// receiver is available (the engine is inside `run`).
    pub async fn wait_for_completion(&mut self) -> bool {
        let Some(rx) = self.jobs_rx.as_mut() else {
            return false;
        };
        let outcome = rx.recv().await;
        match outcome {
            Some(outcome) => {
                self.handle_outcome(outcome);
                true
            }
            None => false,
        }
    }

    // Accessors
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn capture_lock(&self) -> CaptureLock {
        self.capture.lock()
    }

    pub fn averaging_session(&self) -> Option<&AveragingSession> {
        self.averaging.as_ref()
    }

    pub fn results(&self) -> &ResultCache {
        &self.results
    }

    pub fn kiosk_view(&self) -> KioskView {
        self.kiosk.view()
    }

    pub fn kiosk(&self) -> &KioskCoordinator {
        &self.kiosk
    }

    pub fn proximity_status(&self, width: f32) -> ProximityStatus {
        self.proximity.classify(width)
    }

    pub fn recognition(&self) -> Option<&RecognitionCache> {
        self.recognition.as_ref()
    }

    pub fn tick_interval(&self) -> Duration {
        self.adaptive.current()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }
}

impl Drop for MonitoringEngine {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
