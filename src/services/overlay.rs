//! Overlay draw instruction builder
//!
//! Turns this tick's detections and the result cache into draw instructions
//! for the renderer: faded results for faces that dropped out first, then one
//! box per current detection.

use crate::domain::{
    AgeResult, BoundingBox, Color, Detection, DrawInstruction, FaceKey, FaceKeyer, FrameGeometry,
    ResultKind,
};
use crate::services::proximity::ProximityStatus;
use crate::services::result_cache::ResultCache;
use rustc_hash::FxHashSet;
use tokio::time::{Duration, Instant};

/// Opacity cap for results drawn without a matching detection
const FADED_MAX_OPACITY: f32 = 0.7;

/// One detection as seen by the overlay
#[derive(Debug, Clone, Copy)]
pub struct OverlayFace<'a> {
    pub detection: &'a Detection,
    pub key: FaceKey,
    pub status: ProximityStatus,
    /// Countdown until capture, known only for the primary face
    pub remaining: Option<Duration>,
}

/// `"Age: N (PASS)"` with the age shown, else `"PASS"`, `"FAIL"` or `"CHECKED"`
pub fn format_result_label(age: u32, passed: Option<bool>, show_age: bool) -> String {
    if !show_age {
        return match passed {
            Some(true) => "PASS".to_string(),
            Some(false) => "FAIL".to_string(),
            None => "CHECKED".to_string(),
        };
    }
    match passed {
        Some(true) => format!("Age: {age} (PASS)"),
        Some(false) => format!("Age: {age} (FAIL)"),
        None => format!("Age: {age}"),
    }
}

fn result_color(passed: Option<bool>) -> Color {
    match passed {
        Some(true) => Color::PASS,
        Some(false) => Color::FAIL,
        None => Color::CHECKED,
    }
}

fn result_label(result: &AgeResult, show_age: bool) -> String {
    let label = format_result_label(result.age, result.passed, show_age);
    match result.kind {
        ResultKind::Fresh => label,
        ResultKind::Cached => format!("{label} [CACHED]"),
        ResultKind::Averaged => format!("{label} [AVERAGED]"),
    }
}

fn proximity_instruction(bbox: BoundingBox, face: &OverlayFace<'_>) -> Option<DrawInstruction> {
    let (color, label) = match face.status {
        ProximityStatus::InRange => {
            let label = match face.remaining {
                Some(remaining) if !remaining.is_zero() => {
                    let secs = remaining.as_millis().div_ceil(1000);
                    format!("Hold still... {secs}s")
                }
                _ => "Hold still...".to_string(),
            };
            (Color::IN_RANGE, label)
        }
        ProximityStatus::TooFar => (Color::TOO_FAR, "Move closer".to_string()),
        ProximityStatus::TooClose => (Color::TOO_CLOSE, "Move back".to_string()),
        ProximityStatus::NoFace => return None,
    };
    Some(DrawInstruction { bbox, color, label, opacity: 1.0 })
}

pub struct OverlayBuilder {
    show_age: bool,
    mirror: bool,
}

impl OverlayBuilder {
    pub fn new(show_age: bool, mirror: bool) -> Self {
        Self { show_age, mirror }
    }

    pub fn build(
        &self,
        faces: &[OverlayFace<'_>],
        cache: &ResultCache,
        keyer: &dyn FaceKeyer,
        frame: FrameGeometry,
        now: Instant,
    ) -> Vec<DrawInstruction> {
        let detected: FxHashSet<FaceKey> = faces.iter().map(|f| f.key).collect();
        let mut instructions = Vec::with_capacity(faces.len() + cache.len());

        // Stable order keeps renderer output deterministic
        let mut faded: Vec<&AgeResult> = cache
            .iter()
            .filter(|(key, result)| !detected.contains(key) && result.is_displayed(now))
            .map(|(_, result)| result)
            .collect();
        faded.sort_by_key(|r| r.face_key);

        for result in faded {
            instructions.push(DrawInstruction {
                bbox: keyer.estimated_box(&result.face_key),
                color: result_color(result.passed),
                label: result_label(result, self.show_age),
                opacity: faded_opacity(result.opacity),
            });
        }

        for face in faces {
            let bbox = if self.mirror {
                face.detection.bbox.mirrored(frame.width as f32)
            } else {
                face.detection.bbox
            };
            match cache.get(&face.key) {
                Some(result) => instructions.push(DrawInstruction {
                    bbox,
                    color: result_color(result.passed),
                    label: result_label(result, self.show_age),
                    opacity: result.opacity,
                }),
                None => instructions.extend(proximity_instruction(bbox, face)),
            }
        }

        instructions
    }
}

/// Undetected results stay visible. One that has not faded in yet is drawn
/// at the faded ceiling.
fn faded_opacity(opacity: f32) -> f32 {
    if opacity > 0.0 {
        opacity.min(FADED_MAX_OPACITY)
    } else {
        FADED_MAX_OPACITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GridFaceKeyer;
    use rstest::rstest;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn frame() -> FrameGeometry {
        FrameGeometry::new(640, 480)
    }

    #[rstest]
    #[case(30, Some(true), true, "Age: 30 (PASS)")]
    #[case(18, Some(false), true, "Age: 18 (FAIL)")]
    #[case(30, None, true, "Age: 30")]
    #[case(30, Some(true), false, "PASS")]
    #[case(18, Some(false), false, "FAIL")]
    #[case(30, None, false, "CHECKED")]
    fn test_result_labels(
        #[case] age: u32,
        #[case] passed: Option<bool>,
        #[case] show_age: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(format_result_label(age, passed, show_age), expected);
    }

    #[test]
    fn test_proximity_hints() {
        let keyer = GridFaceKeyer::default();
        let cache = ResultCache::new(0.1, ms(5000));
        let builder = OverlayBuilder::new(true, true);
        let near = Detection::new(BoundingBox::new(100.0, 100.0, 200.0, 200.0), 0.9);
        let far = Detection::new(BoundingBox::new(400.0, 100.0, 80.0, 80.0), 0.9);
        let close = Detection::new(BoundingBox::new(0.0, 0.0, 400.0, 400.0), 0.9);

        let faces = [
            OverlayFace {
                detection: &near,
                key: keyer.key_for(&near, frame()),
                status: ProximityStatus::InRange,
                remaining: Some(ms(300)),
            },
            OverlayFace {
                detection: &far,
                key: keyer.key_for(&far, frame()),
                status: ProximityStatus::TooFar,
                remaining: None,
            },
            OverlayFace {
                detection: &close,
                key: keyer.key_for(&close, frame()),
                status: ProximityStatus::TooClose,
                remaining: None,
            },
        ];
        let out = builder.build(&faces, &cache, &keyer, frame(), Instant::now());

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].color, Color::IN_RANGE);
        assert_eq!(out[0].label, "Hold still... 1s");
        assert_eq!(out[0].bbox.x, 340.0);
        assert_eq!(out[1].color, Color::TOO_FAR);
        assert_eq!(out[1].label, "Move closer");
        assert_eq!(out[2].color, Color::TOO_CLOSE);
        assert_eq!(out[2].label, "Move back");
    }

    #[test]
    fn test_detected_face_with_result() {
        let keyer = GridFaceKeyer::default();
        let mut cache = ResultCache::new(0.1, ms(5000));
        let builder = OverlayBuilder::new(false, true);
        let now = Instant::now();
        let detection = Detection::new(BoundingBox::new(100.0, 100.0, 200.0, 200.0), 0.9);
        let key = keyer.key_for(&detection, frame());
        cache.upsert(AgeResult::new(key, 17, Some(false), ResultKind::Cached, now, ms(500)));

        let faces = [OverlayFace {
            detection: &detection,
            key,
            status: ProximityStatus::InRange,
            remaining: None,
        }];
        let out = builder.build(&faces, &cache, &keyer, frame(), now);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].color, Color::FAIL);
        assert_eq!(out[0].label, "FAIL [CACHED]");
        assert_eq!(out[0].opacity, 0.0);
    }

    #[test]
    fn test_undetected_result_drawn_faded_at_estimated_box() {
        let keyer = GridFaceKeyer::default();
        let mut cache = ResultCache::new(0.1, ms(5000));
        let builder = OverlayBuilder::new(true, true);
        let now = Instant::now();
        let key = FaceKey::new(200, 100);
        cache.upsert(AgeResult::new(key, 40, Some(true), ResultKind::Averaged, now, ms(5000)));

        let out = builder.build(&[], &cache, &keyer, frame(), now + ms(100));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BoundingBox::new(150.0, 50.0, 100.0, 100.0));
        assert_eq!(out[0].color, Color::PASS);
        assert_eq!(out[0].label, "Age: 40 (PASS) [AVERAGED]");
        assert_eq!(out[0].opacity, 0.7);

        // past the display window nothing is drawn, even before eviction
        let out = builder.build(&[], &cache, &keyer, frame(), now + ms(5000));
        assert!(out.is_empty());
    }

    #[rstest]
    #[case(0.0, 0.7)]
    #[case(0.3, 0.3)]
    #[case(1.0, 0.7)]
    fn test_faded_opacity(#[case] opacity: f32, #[case] expected: f32) {
        assert_eq!(faded_opacity(opacity), expected);
    }

    #[test]
    fn test_result_not_yet_faded_in_stays_visible_when_face_drops() {
        let keyer = GridFaceKeyer::default();
        let mut cache = ResultCache::new(0.1, ms(500));
        let builder = OverlayBuilder::new(true, true);
        let now = Instant::now();
        let key = FaceKey::new(200, 100);
        cache.upsert(AgeResult::new(key, 30, None, ResultKind::Fresh, now, ms(500)));
        assert_eq!(cache.get(&key).unwrap().opacity, 0.0);

        let out = builder.build(&[], &cache, &keyer, frame(), now + ms(100));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "Age: 30");
        assert_eq!(out[0].opacity, 0.7);
    }
}
