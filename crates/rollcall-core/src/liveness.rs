//! Active liveness detection via eye-blink analysis.
//!
//! A printed photograph or a still on a phone screen keeps its eyes open in
//! every frame. A live subject asked to blink produces at least one frame in
//! which both eyelids are lowered, and the eye aspect ratio (EAR) of that
//! frame drops well below its open-eye value.
//!
//! The EAR of one eye, using the 1-indexed contour `p1..p6`, is
//!
//! ```text
//! EAR = (|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)
//! ```
//!
//! It is invariant under uniform scaling of the landmarks, so the same
//! threshold works regardless of how close the subject sits to the camera.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static images on a screen.
//! - **Does not block:** Video replay of a blinking subject, 3D masks with
//!   moving eyelids.

use crate::face::{FaceLandmarks, Point};

/// Averaged EAR below which the eyes are considered closed. Open eyes sit
/// around 0.30-0.35 for the 68-point layout; a full blink reaches ~0.15.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.27;

/// Horizontal eye widths below this (in pixels) are treated as degenerate.
const MIN_EYE_WIDTH: f32 = 1e-6;

/// Per-frame eye openness measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeOpenness {
    pub left_ear: f32,
    pub right_ear: f32,
    /// Mean of the left and right EAR.
    pub avg_ear: f32,
}

/// Outcome of feeding one sampled frame to a [`BlinkLatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LivenessSample {
    /// No face in the frame. The gate stays open.
    NoFace,
    /// A face was found but an eye contour collapsed to a point.
    Unmeasurable,
    /// Eyes open (averaged EAR at or above the threshold).
    EyesOpen(EyeOpenness),
    /// Blink observed; the latch is now passed.
    Blink(EyeOpenness),
}

fn distance(a: Point, b: Point) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    (dx * dx + dy * dy).sqrt()
}

/// Eye aspect ratio for a 6-point eye contour.
///
/// Returns `None` when the corner-to-corner distance is zero, since the
/// ratio is undefined for a collapsed contour.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f32> {
    let vertical_1 = distance(eye[1], eye[5]);
    let vertical_2 = distance(eye[2], eye[4]);
    let horizontal = distance(eye[0], eye[3]);
    if horizontal < MIN_EYE_WIDTH {
        return None;
    }
    Some((vertical_1 + vertical_2) / (2.0 * horizontal))
}

/// Compute left, right and averaged EAR for one face.
pub fn eye_openness(landmarks: &FaceLandmarks) -> Option<EyeOpenness> {
    let left_ear = eye_aspect_ratio(&landmarks.left_eye())?;
    let right_ear = eye_aspect_ratio(&landmarks.right_eye())?;
    Some(EyeOpenness {
        left_ear,
        right_ear,
        avg_ear: (left_ear + right_ear) / 2.0,
    })
}

/// One-shot blink latch.
///
/// Each call to [`BlinkLatch::observe`] evaluates one frame. The first frame
/// whose averaged EAR falls strictly below the threshold latches the gate;
/// from then on `observe` returns that same blink without re-evaluating.
#[derive(Debug, Clone)]
pub struct BlinkLatch {
    threshold: f32,
    latched: Option<EyeOpenness>,
    frames_observed: usize,
}

impl BlinkLatch {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            latched: None,
            frames_observed: 0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_passed(&self) -> bool {
        self.latched.is_some()
    }

    /// Frames evaluated before (and including) the latching frame.
    pub fn frames_observed(&self) -> usize {
        self.frames_observed
    }

    pub fn observe(&mut self, face: Option<&FaceLandmarks>) -> LivenessSample {
        if let Some(blink) = self.latched {
            return LivenessSample::Blink(blink);
        }
        self.frames_observed += 1;

        let Some(landmarks) = face else {
            return LivenessSample::NoFace;
        };
        let Some(openness) = eye_openness(landmarks) else {
            return LivenessSample::Unmeasurable;
        };

        if openness.avg_ear < self.threshold {
            self.latched = Some(openness);
            LivenessSample::Blink(openness)
        } else {
            LivenessSample::EyesOpen(openness)
        }
    }
}

impl Default for BlinkLatch {
    fn default() -> Self {
        Self::new(DEFAULT_EAR_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eye contour with corners `width` apart and both lid pairs `height` apart.
    fn eye(origin: (f32, f32), width: f32, height: f32) -> [Point; 6] {
        let (x, y) = origin;
        let h = height / 2.0;
        [
            (x, y),
            (x + width / 3.0, y - h),
            (x + 2.0 * width / 3.0, y - h),
            (x + width, y),
            (x + 2.0 * width / 3.0, y + h),
            (x + width / 3.0, y + h),
        ]
    }

    fn face_with_eye_height(height: f32) -> FaceLandmarks {
        FaceLandmarks::from_points(vec![(0.0, 0.0); 68])
            .unwrap()
            .with_eyes(eye((100.0, 50.0), 30.0, height), eye((160.0, 50.0), 30.0, height))
    }

    #[test]
    fn test_ear_formula() {
        // dV1 = dV2 = 9, dH = 30 -> 18 / 60
        let ear = eye_aspect_ratio(&eye((0.0, 0.0), 30.0, 9.0)).unwrap();
        assert!((ear - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_ear_uneven_lids() {
        let contour = [
            (0.0, 0.0),
            (10.0, -4.0),
            (20.0, -3.0),
            (40.0, 0.0),
            (20.0, 3.0),
            (10.0, 4.0),
        ];
        // dV1 = 8, dV2 = 6, dH = 40 -> 14 / 80
        let ear = eye_aspect_ratio(&contour).unwrap();
        assert!((ear - 0.175).abs() < 1e-6);
    }

    #[test]
    fn test_ear_scale_invariant() {
        let base = eye((10.0, 10.0), 24.0, 7.0);
        let scaled = base.map(|(x, y)| (x * 3.5, y * 3.5));
        let a = eye_aspect_ratio(&base).unwrap();
        let b = eye_aspect_ratio(&scaled).unwrap();
        assert!((a - b).abs() < 1e-5);
    }

    #[test]
    fn test_ear_degenerate_contour() {
        assert_eq!(eye_aspect_ratio(&[(5.0, 5.0); 6]), None);
    }

    #[test]
    fn test_openness_averages_both_eyes() {
        let lm = FaceLandmarks::from_points(vec![(0.0, 0.0); 68])
            .unwrap()
            .with_eyes(eye((0.0, 0.0), 30.0, 9.0), eye((60.0, 0.0), 30.0, 3.0));
        let o = eye_openness(&lm).unwrap();
        assert!((o.left_ear - 0.3).abs() < 1e-6);
        assert!((o.right_ear - 0.1).abs() < 1e-6);
        assert!((o.avg_ear - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_no_face_keeps_gate_open() {
        let mut latch = BlinkLatch::default();
        assert_eq!(latch.observe(None), LivenessSample::NoFace);
        assert!(!latch.is_passed());
    }

    #[test]
    fn test_open_eyes_do_not_latch() {
        let mut latch = BlinkLatch::default();
        let open = face_with_eye_height(10.0); // EAR 0.333
        for _ in 0..50 {
            assert!(matches!(latch.observe(Some(&open)), LivenessSample::EyesOpen(_)));
        }
        assert!(!latch.is_passed());
        assert_eq!(latch.frames_observed(), 50);
    }

    #[test]
    fn test_threshold_is_strict() {
        let face = face_with_eye_height(8.1);
        let ear = eye_openness(&face).unwrap().avg_ear;
        assert!((ear - 0.27).abs() < 1e-5);

        // EAR exactly at the threshold is still "open".
        let mut latch = BlinkLatch::new(ear);
        assert!(matches!(latch.observe(Some(&face)), LivenessSample::EyesOpen(_)));
        assert!(!latch.is_passed());
    }

    #[test]
    fn test_blink_latches_once() {
        let mut latch = BlinkLatch::default();
        latch.observe(Some(&face_with_eye_height(10.0)));
        let closed = face_with_eye_height(3.0); // EAR 0.1
        let first = latch.observe(Some(&closed));
        assert!(matches!(first, LivenessSample::Blink(_)));
        assert!(latch.is_passed());
        assert_eq!(latch.frames_observed(), 2);

        // Latched: later frames are not evaluated, even with no face.
        assert_eq!(latch.observe(None), first);
        assert_eq!(latch.observe(Some(&face_with_eye_height(10.0))), first);
        assert_eq!(latch.frames_observed(), 2);
    }

    #[test]
    fn test_unmeasurable_face_does_not_latch() {
        let mut latch = BlinkLatch::default();
        let collapsed = FaceLandmarks::from_points(vec![(3.0, 3.0); 68]).unwrap();
        assert_eq!(latch.observe(Some(&collapsed)), LivenessSample::Unmeasurable);
        assert!(!latch.is_passed());
    }
}
