//! HTTP snapshot camera
//!
//! Polls a JPEG snapshot endpoint and keeps the most recent frame. The frame
//! source is "not ready" until the first snapshot decodes to non-zero
//! dimensions, and again once the latest frame is older than `max_age`.
//! A dead endpoint therefore stops detection instead of replaying one still.

use crate::domain::{CaptureError, Frame, FrameGeometry, FrameSource};
use bytes::Bytes;
use parking_lot::RwLock;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Missed polls tolerated before the latest frame counts as stale
pub const STALE_AFTER_POLLS: u32 = 3;

struct Snapshot {
    frame: Frame,
    fetched_at: Instant,
}

pub struct SnapshotCamera {
    latest: RwLock<Option<Snapshot>>,
    max_age: Duration,
}

impl SnapshotCamera {
    pub fn new(max_age: Duration) -> Self {
        Self { latest: RwLock::new(None), max_age }
    }

    /// Frames expire after `STALE_AFTER_POLLS` poll intervals
    pub fn for_poll_interval(poll_interval: Duration) -> Self {
        Self::new(poll_interval * STALE_AFTER_POLLS)
    }

    /// Read image dimensions from the encoded header without a full decode
    pub fn probe_geometry(data: &[u8]) -> Result<FrameGeometry, CaptureError> {
        let reader = image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| CaptureError::Failed(e.to_string()))?;
        let (width, height) =
            reader.into_dimensions().map_err(|e| CaptureError::Failed(e.to_string()))?;
        let geometry = FrameGeometry::new(width, height);
        if geometry.is_empty() {
            return Err(CaptureError::NotReady);
        }
        Ok(geometry)
    }

    /// Replace the latest frame with a new encoded still
    pub fn publish(&self, data: Bytes) -> Result<FrameGeometry, CaptureError> {
        let geometry = Self::probe_geometry(&data)?;
        *self.latest.write() =
            Some(Snapshot { frame: Frame::new(data, geometry), fetched_at: Instant::now() });
        Ok(geometry)
    }

    /// Poll the snapshot URL until shutdown
    pub async fn run(
        self: Arc<Self>,
        url: String,
        poll_interval: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "camera_client_build_failed");
                return;
            }
        };

        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ready = false;
        let mut failures: u32 = 0;

        info!(url = %url, interval_ms = %poll_interval.as_millis(), "camera_polling_started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = match fetch_snapshot(&client, &url).await {
                        Ok(data) => self.publish(data),
                        Err(e) => Err(CaptureError::Failed(e.to_string())),
                    };
                    match result {
                        Ok(geometry) => {
                            if !ready {
                                ready = true;
                                info!(width = %geometry.width, height = %geometry.height, "camera_ready");
                            } else if failures >= STALE_AFTER_POLLS {
                                info!(failures = %failures, "camera_recovered");
                            }
                            failures = 0;
                        }
                        Err(e) => {
                            failures += 1;
                            if failures == STALE_AFTER_POLLS {
                                warn!(error = %e, failures = %failures, "camera_frames_stale");
                            } else {
                                debug!(error = %e, failures = %failures, "camera_snapshot_failed");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("camera_polling_stopped");
                        return;
                    }
                }
            }
        }
    }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> reqwest::Result<Bytes> {
    client.get(url).send().await?.error_for_status()?.bytes().await
}

impl FrameSource for SnapshotCamera {
    fn current_frame(&self) -> Result<Frame, CaptureError> {
        match self.latest.read().as_ref() {
            Some(snapshot) if snapshot.fetched_at.elapsed() <= self.max_age => {
                Ok(snapshot.frame.clone())
            }
            _ => Err(CaptureError::NotReady),
        }
    }

    /// Last known geometry, kept while frames are stale so faded results
    /// still map to the screen
    fn geometry(&self) -> Option<FrameGeometry> {
        self.latest.read().as_ref().map(|s| s.frame.geometry)
    }
}
