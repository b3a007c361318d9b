//! Job outcome handlers for the MonitoringEngine
//!
//! Each handler applies one completed (or progressing) capture job to the
//! engine state. Outcomes from a generation that was invalidated by `stop`
//! are dropped without touching anything.

use super::{EngineEvent, JobOutcome, MonitoringEngine};
use crate::domain::{
    AgeEstimate, AgeResult, AgeStatistics, AnalysisError, Detection, EngineError, FaceKey,
    ResultKind, SamplerError,
};
use crate::services::averaging::SampleProgress;
use crate::services::result_cache::UpsertOutcome;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl MonitoringEngine {
    pub(crate) fn handle_outcome(&mut self, outcome: JobOutcome) {
        let now = Instant::now();
        match outcome {
            JobOutcome::Analysis { generation, face_key, detection, result, latency_ms } => {
                self.handle_analysis(generation, face_key, &detection, result, latency_ms, now);
            }
            JobOutcome::Sample { generation, progress } => {
                self.handle_sample(generation, progress);
            }
            JobOutcome::AveragingFinished { generation, result } => {
                self.handle_averaging_finished(generation, result, now);
            }
        }
    }

    /// Single capture settled. The lock is released either way; cooldown
    /// keeps running from the trigger time.
    fn handle_analysis(
        &mut self,
        generation: u64,
        face_key: FaceKey,
        detection: &Detection,
        result: Result<AgeEstimate, AnalysisError>,
        latency_ms: u64,
        now: Instant,
    ) {
        if !self.capture.release(generation) {
            debug!(generation = %generation, "stale_analysis_dropped");
            return;
        }
        self.metrics.record_analysis(result.is_ok(), latency_ms);

        match result {
            Ok(estimate) => {
                let age = estimate.rounded();
                let result = AgeResult::new(
                    face_key,
                    age,
                    self.age_gate.evaluate(age),
                    ResultKind::Fresh,
                    now,
                    self.config.min_display(),
                );
                self.store_result(result, now);

                if let Some(recognition) = self.recognition.as_mut() {
                    recognition.insert(detection, age, now);
                }
            }
            Err(e) => {
                self.surface_capture_failure(&EngineError::Analysis(e));
            }
        }
    }

    fn handle_sample(&mut self, generation: u64, progress: SampleProgress) {
        if generation != self.capture.generation() {
            return;
        }
        let Some(session) = self.averaging.as_mut() else {
            return;
        };

        match progress {
            SampleProgress::Accepted { age, latency_ms } => {
                session.samples.push(age);
                let collected = session.samples.len();
                let target = session.target_count;
                self.metrics.record_analysis(true, latency_ms);
                info!(age = %age, collected = %collected, target = %target, "averaging_sample_collected");
                self.emit(EngineEvent::SampleCollected { collected, target, age });
            }
            SampleProgress::NoFace { consecutive, latency_ms } => {
                self.metrics.record_analysis(false, latency_ms);
                self.metrics.record_sample_retries(1);
                debug!(consecutive = %consecutive, "averaging_sample_no_face");
            }
        }
    }

    /// Averaging session ended. Lock released, cooldown restarts now.
    fn handle_averaging_finished(
        &mut self,
        generation: u64,
        result: Result<AgeStatistics, SamplerError>,
        now: Instant,
    ) {
        if !self.capture.release(generation) {
            debug!(generation = %generation, "stale_averaging_dropped");
            return;
        }
        self.capture.start_cooldown(now);
        self.cancel = None;
        let session = self.averaging.take();

        match result {
            Ok(stats) => {
                let Some(session) = session else {
                    warn!("averaging_finished_without_session");
                    return;
                };
                self.metrics.record_averaging_completed();
                info!(
                    face_key = %session.face_key,
                    average = %stats.average,
                    std_dev = format!("{:.2}", stats.std_dev),
                    min = %stats.min,
                    max = %stats.max,
                    elapsed_ms = %now.saturating_duration_since(session.started_at).as_millis(),
                    "averaging_completed"
                );
                let age = stats.average;
                let result = AgeResult::new(
                    session.face_key,
                    age,
                    self.age_gate.evaluate(age),
                    ResultKind::Averaged,
                    now,
                    self.config.long_display(),
                )
                .with_stats(stats);
                self.store_result(result, now);
            }
            Err(e) => {
                self.metrics.record_averaging_aborted();
                let collected = session.map_or(0, |s| s.samples.len());
                warn!(error = %e, discarded_samples = %collected, "averaging_aborted");
                self.emit(EngineEvent::AveragingAborted { error: EngineError::Sampler(e) });
            }
        }
    }

    /// Write a result to the cache and fan it out to the kiosk, scan log,
    /// metrics and event listeners.
    pub(crate) fn store_result(&mut self, result: AgeResult, now: Instant) {
        let (face_key, age, passed, kind) = (result.face_key, result.age, result.passed, result.kind);

        if let Some(ref scan_log) = self.scan_log {
            if !scan_log.write_result(&result) {
                self.metrics.record_scan_log_error();
            }
        }

        let outcome = self.results.upsert(result);
        self.metrics.record_result(kind);
        info!(
            face_key = %face_key,
            age = %age,
            passed = ?passed,
            kind = %kind.as_str(),
            extended = %(outcome == UpsertOutcome::Extended),
            "result_stored"
        );

        if let Some(view) = self.kiosk.on_result(now) {
            self.apply_view(view);
        }
        self.emit(EngineEvent::ResultProduced { face_key, age, passed, kind });
    }

    pub(crate) fn surface_capture_failure(&self, error: &EngineError) {
        self.metrics.record_capture_failure();
        log_capture_failure(error);
        self.emit(EngineEvent::CaptureFailed { error: error.clone() });
    }
}

#[cold]
fn log_capture_failure(error: &EngineError) {
    error!(error = %error, "capture_failed");
}
