//! Descriptor-based recognition cache
//!
//! Remembers faces that were recently analyzed so the same person standing
//! in front of the kiosk is not sent to the estimator again. A match needs
//! both a close descriptor and a nearby box center.

use crate::domain::Detection;
use crate::infra::config::RecognitionSection;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct TrackedFace {
    id: u64,
    descriptor: Vec<f32>,
    center: (f32, f32),
    first_seen: Instant,
    last_seen: Instant,
    age: u32,
    hits: u32,
}

impl TrackedFace {
    /// Hits per second since first seen; lowest is evicted first
    fn hit_rate(&self, now: Instant) -> f64 {
        let secs = now.saturating_duration_since(self.first_seen).as_secs_f64().max(1e-3);
        self.hits as f64 / secs
    }
}

/// A face matched against the cache
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionHit {
    pub id: u64,
    pub age: u32,
    pub distance: f32,
    pub hits: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecognitionStats {
    pub checks: u64,
    pub hits: u64,
    pub inserts: u64,
    pub size: usize,
}

impl RecognitionStats {
    pub fn hit_rate(&self) -> f64 {
        if self.checks == 0 {
            0.0
        } else {
            self.hits as f64 / self.checks as f64
        }
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt())
}

fn center_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

pub struct RecognitionCache {
    faces: Vec<TrackedFace>,
    next_id: u64,
    descriptor_threshold: f32,
    position_threshold: f32,
    max_size: usize,
    min_quality: f32,
    expiration: Duration,
    stats: RecognitionStats,
}

impl RecognitionCache {
    pub fn new(config: &RecognitionSection) -> Self {
        Self {
            faces: Vec::with_capacity(config.max_size),
            next_id: 1,
            descriptor_threshold: config.descriptor_threshold,
            position_threshold: config.position_threshold,
            max_size: config.max_size.max(1),
            min_quality: config.min_quality,
            expiration: Duration::from_secs(config.expiration_secs),
            stats: RecognitionStats::default(),
        }
    }

    /// Look a detection up. Low-quality detections and detections without a
    /// descriptor never match.
    pub fn check(&mut self, detection: &Detection, now: Instant) -> Option<RecognitionHit> {
        self.stats.checks += 1;

        let descriptor = detection.descriptor.as_deref()?;
        if detection.confidence < self.min_quality {
            return None;
        }
        let center = detection.bbox.center();
        let (descriptor_threshold, position_threshold) =
            (self.descriptor_threshold, self.position_threshold);

        let best = self
            .faces
            .iter_mut()
            .filter_map(|face| {
                let distance = euclidean(descriptor, &face.descriptor)?;
                let close = distance < descriptor_threshold
                    && center_distance(center, face.center) < position_threshold;
                close.then_some((face, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let (face, distance) = best?;
        face.last_seen = now;
        face.center = center;
        face.hits += 1;
        self.stats.hits += 1;

        debug!(face_id = %face.id, distance = format!("{distance:.3}"), hits = %face.hits, "recognition_hit");
        Some(RecognitionHit { id: face.id, age: face.age, distance, hits: face.hits })
    }

    /// Remember an analyzed face. Returns the new id, or None without a descriptor.
    pub fn insert(&mut self, detection: &Detection, age: u32, now: Instant) -> Option<u64> {
        let descriptor = detection.descriptor.clone()?;

        if self.faces.len() >= self.max_size {
            let evict = self
                .faces
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.hit_rate(now).total_cmp(&b.hit_rate(now)))
                .map(|(i, _)| i);
            if let Some(i) = evict {
                let removed = self.faces.swap_remove(i);
                debug!(face_id = %removed.id, hits = %removed.hits, "recognition_evicted");
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.faces.push(TrackedFace {
            id,
            descriptor,
            center: detection.bbox.center(),
            first_seen: now,
            last_seen: now,
            age,
            hits: 0,
        });
        self.stats.inserts += 1;
        info!(face_id = %id, age = %age, cache_size = %self.faces.len(), "recognition_face_added");
        Some(id)
    }

    /// Drop faces unseen for longer than the expiration window
    pub fn cleanup(&mut self, now: Instant) -> usize {
        let before = self.faces.len();
        let expiration = self.expiration;
        self.faces.retain(|f| now.saturating_duration_since(f.last_seen) <= expiration);
        before - self.faces.len()
    }

    pub fn clear(&mut self) {
        self.faces.clear();
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn stats(&self) -> RecognitionStats {
        RecognitionStats { size: self.faces.len(), ..self.stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BoundingBox;
    use approx::assert_relative_eq;

    fn config() -> RecognitionSection {
        RecognitionSection { enabled: true, ..RecognitionSection::default() }
    }

    fn face_at(x: f32, descriptor: &[f32], confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x, 100.0, 200.0, 200.0), confidence)
            .with_descriptor(descriptor.to_vec())
    }

    #[test]
    fn test_hit_after_insert() {
        let mut cache = RecognitionCache::new(&config());
        let now = Instant::now();

        assert!(cache.check(&face_at(100.0, &[0.1, 0.2, 0.3], 0.95), now).is_none());
        cache.insert(&face_at(100.0, &[0.1, 0.2, 0.3], 0.95), 34, now);

        let hit = cache.check(&face_at(130.0, &[0.12, 0.2, 0.31], 0.95), now).unwrap();
        assert_eq!(hit.age, 34);
        assert_eq!(hit.hits, 1);
        assert!(hit.distance < 0.4);

        let stats = cache.stats();
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.hits, 1);
        assert_relative_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_requires_quality_descriptor_and_position() {
        let mut cache = RecognitionCache::new(&config());
        let now = Instant::now();
        cache.insert(&face_at(100.0, &[0.1, 0.2, 0.3], 0.95), 34, now);

        // below min quality
        assert!(cache.check(&face_at(100.0, &[0.1, 0.2, 0.3], 0.8), now).is_none());
        // no descriptor
        let bare = Detection::new(BoundingBox::new(100.0, 100.0, 200.0, 200.0), 0.95);
        assert!(cache.check(&bare, now).is_none());
        // moved too far
        assert!(cache.check(&face_at(400.0, &[0.1, 0.2, 0.3], 0.95), now).is_none());
        // different person
        assert!(cache.check(&face_at(100.0, &[0.9, 0.9, 0.9], 0.95), now).is_none());
        // mismatched descriptor length
        assert!(cache.check(&face_at(100.0, &[0.1, 0.2], 0.95), now).is_none());
    }

    #[test]
    fn test_best_distance_wins() {
        let mut cache = RecognitionCache::new(&config());
        let now = Instant::now();
        cache.insert(&face_at(100.0, &[0.0, 0.0], 0.95), 20, now);
        cache.insert(&face_at(100.0, &[0.3, 0.0], 0.95), 50, now);

        let hit = cache.check(&face_at(100.0, &[0.25, 0.0], 0.95), now).unwrap();
        assert_eq!(hit.age, 50);
    }

    #[test]
    fn test_evicts_lowest_hit_rate_when_full() {
        let cfg = RecognitionSection { max_size: 2, ..config() };
        let mut cache = RecognitionCache::new(&cfg);
        let t0 = Instant::now();

        cache.insert(&face_at(100.0, &[0.0, 0.0], 0.95), 20, t0);
        cache.insert(&face_at(100.0, &[5.0, 5.0], 0.95), 40, t0);
        // give the first face some hits
        cache.check(&face_at(100.0, &[0.0, 0.0], 0.95), t0 + Duration::from_secs(1));

        cache.insert(&face_at(100.0, &[9.0, 9.0], 0.95), 60, t0 + Duration::from_secs(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.check(&face_at(100.0, &[5.0, 5.0], 0.95), t0).is_none());
        assert!(cache.check(&face_at(100.0, &[0.0, 0.0], 0.95), t0).is_some());
    }

    #[test]
    fn test_cleanup_expires_unseen_faces() {
        let mut cache = RecognitionCache::new(&config());
        let t0 = Instant::now();
        cache.insert(&face_at(100.0, &[0.0, 0.0], 0.95), 20, t0);

        assert_eq!(cache.cleanup(t0 + Duration::from_secs(30)), 0);
        assert_eq!(cache.cleanup(t0 + Duration::from_secs(31)), 1);
        assert!(cache.is_empty());
    }
}
