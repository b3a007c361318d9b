//! Multi-sample age averaging
//!
//! `AveragingSampler::run` collects `target_count` accepted samples as one
//! sequential async chain: settle, capture, analyze, then pause before the
//! next slot. No-face samples are retried in place. Every await observes the
//! session's cancellation token.

use crate::domain::{
    AgeStatistics, AnalysisError, AnalysisService, FaceKey, FrameSource, SamplerError,
};
use crate::infra::config::MonitoringConfig;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Engine-side view of a running session
#[derive(Debug, Clone, PartialEq)]
pub struct AveragingSession {
    pub active: bool,
    pub samples: Vec<u32>,
    pub target_count: u32,
    /// Face that triggered the session; the result is stored under it
    pub face_key: FaceKey,
    pub started_at: Instant,
}

impl AveragingSession {
    pub fn new(face_key: FaceKey, target_count: u32, now: Instant) -> Self {
        Self {
            active: true,
            samples: Vec::with_capacity(target_count as usize),
            target_count,
            face_key,
            started_at: now,
        }
    }

    pub fn progress(&self) -> (usize, u32) {
        (self.samples.len(), self.target_count)
    }
}

/// Progress reported while a session runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleProgress {
    Accepted { age: u32, latency_ms: u64 },
    NoFace { consecutive: u32, latency_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub target_count: u32,
    pub settle: Duration,
    pub sample_delay: Duration,
    pub retry_delay: Duration,
    /// Consecutive no-face attempts before aborting (0 = unlimited)
    pub max_retries: u32,
}

impl SamplerSettings {
    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self {
            target_count: config.samples_to_average,
            settle: Duration::from_millis(config.sample_settle_ms),
            sample_delay: Duration::from_millis(config.sample_delay_ms),
            retry_delay: Duration::from_millis(config.sample_retry_delay_ms),
            max_retries: config.max_sample_retries,
        }
    }
}

#[derive(Clone)]
pub struct AveragingSampler {
    frames: Arc<dyn FrameSource>,
    analysis: Arc<dyn AnalysisService>,
    settings: SamplerSettings,
}

/// Run `fut` unless the token fires first
async fn cancellable<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    fut: F,
) -> Result<F::Output, SamplerError> {
    if *cancel.borrow() {
        return Err(SamplerError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.changed() => Err(SamplerError::Cancelled),
        out = fut => Ok(out),
    }
}

impl AveragingSampler {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        analysis: Arc<dyn AnalysisService>,
        settings: SamplerSettings,
    ) -> Self {
        Self { frames, analysis, settings }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        mut cancel: watch::Receiver<bool>,
        mut on_progress: impl FnMut(SampleProgress) + Send,
    ) -> Result<AgeStatistics, SamplerError> {
        let target = self.settings.target_count as usize;
        let mut samples: Vec<u32> = Vec::with_capacity(target);
        let mut consecutive_misses = 0u32;

        while samples.len() < target {
            cancellable(&mut cancel, sleep(self.settings.settle)).await?;

            let frame = self.frames.current_frame()?;
            let started = Instant::now();
            let estimate = cancellable(&mut cancel, self.analysis.estimate_age(&frame)).await?;
            let latency_ms = started.elapsed().as_millis() as u64;

            match estimate {
                Ok(estimate) => {
                    consecutive_misses = 0;
                    let age = estimate.rounded();
                    samples.push(age);
                    debug!(age = %age, collected = %samples.len(), wanted = %target, "sample_accepted");
                    on_progress(SampleProgress::Accepted { age, latency_ms });

                    if samples.len() < target {
                        cancellable(&mut cancel, sleep(self.settings.sample_delay)).await?;
                    }
                }
                Err(AnalysisError::NoFaceFound) => {
                    consecutive_misses += 1;
                    debug!(consecutive = %consecutive_misses, "sample_no_face_retrying");
                    on_progress(SampleProgress::NoFace { consecutive: consecutive_misses, latency_ms });

                    if self.settings.max_retries > 0 && consecutive_misses >= self.settings.max_retries {
                        return Err(SamplerError::TooManyRetries(consecutive_misses));
                    }
                    cancellable(&mut cancel, sleep(self.settings.retry_delay)).await?;
                }
                Err(e) => return Err(SamplerError::Analysis(e)),
            }
        }

        AgeStatistics::from_samples(&samples).ok_or(SamplerError::NoSamples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgeEstimate, CaptureError, Frame, FrameGeometry};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct StaticFrames {
        ready: bool,
    }

    impl FrameSource for StaticFrames {
        fn current_frame(&self) -> Result<Frame, CaptureError> {
            if self.ready {
                Ok(Frame::new(Bytes::from_static(b"jpeg"), FrameGeometry::new(640, 480)))
            } else {
                Err(CaptureError::NotReady)
            }
        }

        fn geometry(&self) -> Option<FrameGeometry> {
            self.ready.then(|| FrameGeometry::new(640, 480))
        }
    }

    /// Plays back a scripted sequence of estimator responses
    struct ScriptedAnalysis {
        script: Mutex<VecDeque<Result<AgeEstimate, AnalysisError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedAnalysis {
        fn new(script: Vec<Result<AgeEstimate, AnalysisError>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), calls: Mutex::new(0) })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl AnalysisService for ScriptedAnalysis {
        async fn estimate_age(&self, _frame: &Frame) -> Result<AgeEstimate, AnalysisError> {
            *self.calls.lock() += 1;
            self.script.lock().pop_front().unwrap_or(Err(AnalysisError::NoFaceFound))
        }
    }

    fn age(v: f32) -> Result<AgeEstimate, AnalysisError> {
        Ok(AgeEstimate { age: v })
    }

    fn sampler(
        analysis: Arc<ScriptedAnalysis>,
        ready: bool,
        max_retries: u32,
    ) -> AveragingSampler {
        let mut settings = SamplerSettings::from_config(&MonitoringConfig::default());
        settings.max_retries = max_retries;
        AveragingSampler::new(Arc::new(StaticFrames { ready }), analysis, settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_five_samples() {
        let analysis = ScriptedAnalysis::new(vec![age(20.0), age(22.0), age(24.0), age(21.0), age(23.0)]);
        let sampler = sampler(analysis.clone(), true, 0);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let started = Instant::now();
        let mut progress = Vec::new();
        let stats = sampler.run(cancel_rx, |p| progress.push(p)).await.unwrap();

        assert_eq!(stats.average, 22);
        assert_eq!(stats.min, 20);
        assert_eq!(stats.max, 24);
        assert_relative_eq!(stats.std_dev, 1.414, epsilon = 1e-3);
        assert_eq!(analysis.calls(), 5);
        assert_eq!(progress.len(), 5);
        // 5 settles of 500 ms plus 4 gaps of 1000 ms
        assert_eq!(started.elapsed(), Duration::from_millis(6500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_face_retries_without_consuming_slot() {
        let analysis = ScriptedAnalysis::new(vec![
            age(30.0),
            Err(AnalysisError::NoFaceFound),
            Err(AnalysisError::NoFaceFound),
            age(32.0),
            age(31.0),
            age(30.0),
            age(32.0),
        ]);
        let sampler = sampler(analysis.clone(), true, 0);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let mut misses = 0;
        let stats = sampler
            .run(cancel_rx, |p| {
                if matches!(p, SampleProgress::NoFace { .. }) {
                    misses += 1;
                }
            })
            .await
            .unwrap();

        assert_eq!(stats.samples, vec![30, 32, 31, 30, 32]);
        assert_eq!(misses, 2);
        assert_eq!(analysis.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_aborts() {
        let analysis = ScriptedAnalysis::new(vec![age(30.0)]);
        let sampler = sampler(analysis.clone(), true, 3);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = sampler.run(cancel_rx, |_| {}).await.unwrap_err();
        assert_eq!(err, SamplerError::TooManyRetries(3));
        assert_eq!(analysis.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_aborts() {
        let analysis = ScriptedAnalysis::new(vec![
            age(30.0),
            Err(AnalysisError::Backend("model crashed".to_string())),
        ]);
        let sampler = sampler(analysis, true, 0);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = sampler.run(cancel_rx, |_| {}).await.unwrap_err();
        assert!(matches!(err, SamplerError::Analysis(AnalysisError::Backend(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_aborts() {
        let analysis = ScriptedAnalysis::new(vec![age(30.0)]);
        let sampler = sampler(analysis.clone(), false, 0);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let err = sampler.run(cancel_rx, |_| {}).await.unwrap_err();
        assert_eq!(err, SamplerError::Capture(CaptureError::NotReady));
        assert_eq!(analysis.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let analysis = ScriptedAnalysis::new(vec![age(30.0), age(31.0)]);
        let sampler = sampler(analysis.clone(), true, 0);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { sampler.run(cancel_rx, |_| {}).await });

        // first sample lands at 500 ms, then a 1000 ms gap
        tokio::time::sleep(Duration::from_millis(700)).await;
        cancel_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap().unwrap_err(), SamplerError::Cancelled);
        assert_eq!(analysis.calls(), 1);
    }
}
