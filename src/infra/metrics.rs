//! Lock-free metrics collection and periodic reporting
//!
//! Counters are updated from the engine task and read by the reporter and the
//! Prometheus endpoint. Reporting swaps the periodic counters to zero.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only; never use them for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Analysis latency bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

/// Kiosk view gauge values
pub const KIOSK_VIEW_IDLE: u64 = 0;
pub const KIOSK_VIEW_LIVE: u64 = 1;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].swap(0, Ordering::Relaxed))
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Ticks processed (monotonic)
    ticks_total: AtomicU64,
    /// Ticks since last report (reset on report)
    ticks_since_report: AtomicU64,
    /// Ticks skipped while a single capture held the lock
    ticks_skipped_total: AtomicU64,
    detector_errors_total: AtomicU64,
    /// Faces seen across all ticks after the confidence filter
    faces_detected_total: AtomicU64,
    captures_triggered_total: AtomicU64,
    capture_failures_total: AtomicU64,
    analysis_ok_total: AtomicU64,
    analysis_failed_total: AtomicU64,
    /// Analysis latency histogram (reset on report)
    analysis_latency_buckets: [AtomicU64; NUM_BUCKETS],
    analysis_latency_sum_ms: AtomicU64,
    analysis_latency_max_ms: AtomicU64,
    averaging_started_total: AtomicU64,
    averaging_completed_total: AtomicU64,
    averaging_aborted_total: AtomicU64,
    /// No-face samples retried inside averaging sessions
    sample_retries_total: AtomicU64,
    recognition_hits_total: AtomicU64,
    results_fresh_total: AtomicU64,
    results_cached_total: AtomicU64,
    results_averaged_total: AtomicU64,
    results_evicted_total: AtomicU64,
    kiosk_transitions_total: AtomicU64,
    /// Current kiosk view (0=idle, 1=live)
    kiosk_view: AtomicU64,
    /// Current result cache size (point-in-time)
    result_cache_size: AtomicU64,
    /// Current tick interval in ms (point-in-time)
    tick_interval_ms: AtomicU64,
    scan_log_errors_total: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_since_report: AtomicU64::new(0),
            ticks_skipped_total: AtomicU64::new(0),
            detector_errors_total: AtomicU64::new(0),
            faces_detected_total: AtomicU64::new(0),
            captures_triggered_total: AtomicU64::new(0),
            capture_failures_total: AtomicU64::new(0),
            analysis_ok_total: AtomicU64::new(0),
            analysis_failed_total: AtomicU64::new(0),
            analysis_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            analysis_latency_sum_ms: AtomicU64::new(0),
            analysis_latency_max_ms: AtomicU64::new(0),
            averaging_started_total: AtomicU64::new(0),
            averaging_completed_total: AtomicU64::new(0),
            averaging_aborted_total: AtomicU64::new(0),
            sample_retries_total: AtomicU64::new(0),
            recognition_hits_total: AtomicU64::new(0),
            results_fresh_total: AtomicU64::new(0),
            results_cached_total: AtomicU64::new(0),
            results_averaged_total: AtomicU64::new(0),
            results_evicted_total: AtomicU64::new(0),
            kiosk_transitions_total: AtomicU64::new(0),
            kiosk_view: AtomicU64::new(KIOSK_VIEW_IDLE),
            result_cache_size: AtomicU64::new(0),
            tick_interval_ms: AtomicU64::new(0),
            scan_log_errors_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_tick(&self, faces: usize) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
        self.ticks_since_report.fetch_add(1, Ordering::Relaxed);
        self.faces_detected_total.fetch_add(faces as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tick_skipped(&self) {
        self.ticks_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detector_error(&self) {
        self.detector_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_triggered(&self) {
        self.captures_triggered_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_failure(&self) {
        self.capture_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settled analysis call with its latency
    #[inline]
    pub fn record_analysis(&self, ok: bool, latency_ms: u64) {
        if ok {
            self.analysis_ok_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.analysis_failed_total.fetch_add(1, Ordering::Relaxed);
        }
        self.analysis_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.analysis_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.analysis_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_averaging_started(&self) {
        self.averaging_started_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_averaging_completed(&self) {
        self.averaging_completed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_averaging_aborted(&self) {
        self.averaging_aborted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_retries(&self, retries: u32) {
        self.sample_retries_total.fetch_add(retries as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recognition_hit(&self) {
        self.recognition_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_result(&self, kind: crate::domain::ResultKind) {
        use crate::domain::ResultKind;
        let counter = match kind {
            ResultKind::Fresh => &self.results_fresh_total,
            ResultKind::Cached => &self.results_cached_total,
            ResultKind::Averaged => &self.results_averaged_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: usize) {
        self.results_evicted_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a kiosk view change (`live` true for Live)
    #[inline]
    pub fn record_kiosk_transition(&self, live: bool) {
        self.kiosk_transitions_total.fetch_add(1, Ordering::Relaxed);
        let view = if live { KIOSK_VIEW_LIVE } else { KIOSK_VIEW_IDLE };
        self.kiosk_view.store(view, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_result_cache_size(&self, size: usize) {
        self.result_cache_size.store(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_tick_interval_ms(&self, interval_ms: u64) {
        self.tick_interval_ms.store(interval_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_scan_log_error(&self) {
        self.scan_log_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn ticks_total(&self) -> u64 {
        self.ticks_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ticks_skipped_total(&self) -> u64 {
        self.ticks_skipped_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn captures_triggered_total(&self) -> u64 {
        self.captures_triggered_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn recognition_hits_total(&self) -> u64 {
        self.recognition_hits_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn kiosk_view(&self) -> u64 {
        self.kiosk_view.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, then reset the periodic ones
    pub fn report(&self) -> MetricsSummary {
        let ticks_count = self.ticks_since_report.swap(0, Ordering::Relaxed);
        let latency_buckets = swap_buckets(&self.analysis_latency_buckets);
        let latency_sum = self.analysis_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.analysis_latency_max_ms.swap(0, Ordering::Relaxed);
        let latency_count: u64 = latency_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ticks_per_sec = if elapsed.as_secs_f64() > 0.0 {
            ticks_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_per_sec,
            ticks_skipped_total: self.ticks_skipped_total.load(Ordering::Relaxed),
            detector_errors_total: self.detector_errors_total.load(Ordering::Relaxed),
            faces_detected_total: self.faces_detected_total.load(Ordering::Relaxed),
            captures_triggered_total: self.captures_triggered_total.load(Ordering::Relaxed),
            capture_failures_total: self.capture_failures_total.load(Ordering::Relaxed),
            analysis_ok_total: self.analysis_ok_total.load(Ordering::Relaxed),
            analysis_failed_total: self.analysis_failed_total.load(Ordering::Relaxed),
            analysis_latency_buckets: latency_buckets,
            analysis_latency_avg_ms: if latency_count > 0 { latency_sum / latency_count } else { 0 },
            analysis_latency_max_ms: latency_max,
            analysis_latency_p95_ms: percentile_from_buckets(&latency_buckets, 0.95),
            averaging_started_total: self.averaging_started_total.load(Ordering::Relaxed),
            averaging_completed_total: self.averaging_completed_total.load(Ordering::Relaxed),
            averaging_aborted_total: self.averaging_aborted_total.load(Ordering::Relaxed),
            sample_retries_total: self.sample_retries_total.load(Ordering::Relaxed),
            recognition_hits_total: self.recognition_hits_total.load(Ordering::Relaxed),
            results_fresh_total: self.results_fresh_total.load(Ordering::Relaxed),
            results_cached_total: self.results_cached_total.load(Ordering::Relaxed),
            results_averaged_total: self.results_averaged_total.load(Ordering::Relaxed),
            results_evicted_total: self.results_evicted_total.load(Ordering::Relaxed),
            kiosk_transitions_total: self.kiosk_transitions_total.load(Ordering::Relaxed),
            kiosk_view: self.kiosk_view.load(Ordering::Relaxed),
            result_cache_size: self.result_cache_size.load(Ordering::Relaxed),
            tick_interval_ms: self.tick_interval_ms.load(Ordering::Relaxed),
            scan_log_errors_total: self.scan_log_errors_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub ticks_total: u64,
    pub ticks_per_sec: f64,
    pub ticks_skipped_total: u64,
    pub detector_errors_total: u64,
    pub faces_detected_total: u64,
    pub captures_triggered_total: u64,
    pub capture_failures_total: u64,
    pub analysis_ok_total: u64,
    pub analysis_failed_total: u64,
    /// Analysis latency histogram since last report (ms buckets)
    pub analysis_latency_buckets: [u64; NUM_BUCKETS],
    pub analysis_latency_avg_ms: u64,
    pub analysis_latency_max_ms: u64,
    pub analysis_latency_p95_ms: u64,
    pub averaging_started_total: u64,
    pub averaging_completed_total: u64,
    pub averaging_aborted_total: u64,
    pub sample_retries_total: u64,
    pub recognition_hits_total: u64,
    pub results_fresh_total: u64,
    pub results_cached_total: u64,
    pub results_averaged_total: u64,
    pub results_evicted_total: u64,
    pub kiosk_transitions_total: u64,
    /// 0=idle, 1=live
    pub kiosk_view: u64,
    pub result_cache_size: u64,
    pub tick_interval_ms: u64,
    pub scan_log_errors_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ticks_total = %self.ticks_total,
            ticks_per_sec = format!("{:.1}", self.ticks_per_sec),
            ticks_skipped = %self.ticks_skipped_total,
            detector_errors = %self.detector_errors_total,
            captures = %self.captures_triggered_total,
            analysis_ok = %self.analysis_ok_total,
            analysis_failed = %self.analysis_failed_total,
            analysis_avg_ms = %self.analysis_latency_avg_ms,
            analysis_p95_ms = %self.analysis_latency_p95_ms,
            averaged = %self.averaging_completed_total,
            averaging_aborted = %self.averaging_aborted_total,
            recognition_hits = %self.recognition_hits_total,
            cache_size = %self.result_cache_size,
            interval_ms = %self.tick_interval_ms,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResultKind;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.ticks_total(), 0);
        assert_eq!(metrics.kiosk_view(), KIOSK_VIEW_IDLE);
    }

    #[test]
    fn test_record_tick() {
        let metrics = Metrics::new();
        metrics.record_tick(1);
        metrics.record_tick(0);
        metrics.record_tick_skipped();

        assert_eq!(metrics.ticks_total(), 2);
        assert_eq!(metrics.ticks_skipped_total(), 1);
        assert_eq!(metrics.faces_detected_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_tick(1);
        metrics.record_analysis(true, 120);
        metrics.record_analysis(false, 480);
        metrics.record_result(ResultKind::Fresh);

        let summary = metrics.report();
        assert_eq!(summary.ticks_total, 1);
        assert_eq!(summary.analysis_ok_total, 1);
        assert_eq!(summary.analysis_failed_total, 1);
        assert_eq!(summary.analysis_latency_avg_ms, 300);
        assert_eq!(summary.analysis_latency_max_ms, 480);
        assert_eq!(summary.results_fresh_total, 1);

        assert_eq!(metrics.ticks_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.analysis_latency_sum_ms.load(Ordering::Relaxed), 0);

        // monotonic counters survive
        let summary = metrics.report();
        assert_eq!(summary.ticks_total, 1);
        assert_eq!(summary.analysis_latency_avg_ms, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(51), 1);
        assert_eq!(bucket_index(25600), 9);
        assert_eq!(bucket_index(25601), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_analysis(true, 150);
        }
        let summary = metrics.report();
        assert_eq!(summary.analysis_latency_p95_ms, 200);
    }

    #[test]
    fn test_kiosk_transition_gauge() {
        let metrics = Metrics::new();
        metrics.record_kiosk_transition(true);
        assert_eq!(metrics.kiosk_view(), KIOSK_VIEW_LIVE);
        metrics.record_kiosk_transition(false);
        assert_eq!(metrics.kiosk_view(), KIOSK_VIEW_IDLE);
        assert_eq!(metrics.report().kiosk_transitions_total, 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_tick(1);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.ticks_total(), 8000);
    }
}
