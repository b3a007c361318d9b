//! Per-face result cache and overlay lifecycle
//!
//! Holds at most one `AgeResult` per `FaceKey`. Entries fade in while their
//! face is detected and are only evicted once both their display window has
//! ended and they are older than the retention window.

use crate::domain::{AgeResult, FaceKey, ResultKind};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// What an upsert did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Age changed; the old entry was overwritten
    Replaced,
    /// Same age; the existing entry's display window was extended
    Extended,
}

pub struct ResultCache {
    entries: FxHashMap<FaceKey, AgeResult>,
    fade_step: f32,
    max_age: Duration,
}

impl ResultCache {
    pub fn new(fade_step: f32, max_age: Duration) -> Self {
        Self { entries: FxHashMap::default(), fade_step, max_age }
    }

    pub fn get(&self, key: &FaceKey) -> Option<&AgeResult> {
        self.entries.get(key)
    }

    /// Insert or update the result for its face key.
    ///
    /// A same-age result only extends `display_until` (no flicker). It also
    /// snaps opacity to full, ending any fade-in still in progress. An
    /// averaged result still upgrades the entry's kind and stats.
    pub fn upsert(&mut self, result: AgeResult) -> UpsertOutcome {
        let key = result.face_key;
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(key, result);
                UpsertOutcome::Inserted
            }
            Some(existing) if existing.age != result.age => {
                debug!(face_key = %key, old_age = %existing.age, new_age = %result.age, "result_replaced");
                *existing = result;
                UpsertOutcome::Replaced
            }
            Some(existing) => {
                existing.display_until = existing.display_until.max(result.display_until);
                existing.opacity = 1.0;
                if result.kind == ResultKind::Averaged {
                    existing.kind = ResultKind::Averaged;
                    existing.stats = result.stats;
                }
                UpsertOutcome::Extended
            }
        }
    }

    /// Advance fades for detected keys and evict expired entries.
    ///
    /// Returns the number of evicted entries.
    pub fn tick(&mut self, now: Instant, detected: &FxHashSet<FaceKey>) -> usize {
        let fade_step = self.fade_step;
        for (key, result) in self.entries.iter_mut() {
            if detected.contains(key) && result.opacity < 1.0 {
                result.opacity = (result.opacity + fade_step).min(1.0);
            }
        }

        let before = self.entries.len();
        let max_age = self.max_age;
        self.entries.retain(|key, result| {
            let keep = result.is_displayed(now)
                || now.saturating_duration_since(result.created_at) <= max_age;
            if !keep {
                debug!(face_key = %key, age = %result.age, "result_evicted");
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FaceKey, &AgeResult)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
