// src/landmarks.rs
//! Hand landmarks and the raised-finger classifier.
//!
//! Landmark indices follow the MediaPipe hand model: 0 is the wrist and
//! 4/8/12/16/20 are the fingertips of thumb, index, middle, ring and pinky.

use anyhow::{anyhow, Result};

pub const LANDMARK_COUNT: usize = 21;

pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_FINGER_TIP: usize = 8;
pub const MIDDLE_FINGER_TIP: usize = 12;
pub const RING_FINGER_TIP: usize = 16;
pub const PINKY_TIP: usize = 20;

/// Fingertip indices in thumb..pinky order.
pub const TIP_IDS: [usize; 5] = [
    THUMB_TIP,
    INDEX_FINGER_TIP,
    MIDDLE_FINGER_TIP,
    RING_FINGER_TIP,
    PINKY_TIP,
];

/// Bone pairs used when drawing the hand skeleton.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (5, 9), (9, 10), (10, 11), (11, 12),
    (9, 13), (13, 14), (14, 15), (15, 16),
    (13, 17), (17, 18), (18, 19), (19, 20),
    (0, 17),
];

/// A landmark position in frame pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// The 21 landmarks of a single detected hand.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Point; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(points: [Point; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point; LANDMARK_COUNT] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Point {
        self.points[index]
    }
}

impl TryFrom<&[Point]> for LandmarkSet {
    type Error = anyhow::Error;

    fn try_from(points: &[Point]) -> Result<Self> {
        let points: [Point; LANDMARK_COUNT] = points.try_into().map_err(|_| {
            anyhow!(
                "Expected {} hand landmarks, got {}",
                LANDMARK_COUNT,
                points.len()
            )
        })?;
        Ok(Self::new(points))
    }
}

/// Which fingers are extended, in thumb, index, middle, ring, pinky order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FingerStates(pub [bool; 5]);

impl FingerStates {
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&up| up).count()
    }
}

/// Classifies each finger of `hand` as extended or not.
///
/// `None` means no hand was visible and yields `None`, which callers must keep
/// apart from a closed fist (`Some` with a count of zero).
pub fn classify(hand: Option<&LandmarkSet>) -> Option<FingerStates> {
    let hand = hand?;
    let mut fingers = [false; 5];

    // Thumb folds sideways: compare x against the joint just below the tip.
    fingers[0] = hand.get(THUMB_TIP).x > hand.get(THUMB_IP).x;

    for (finger, &tip_id) in TIP_IDS.iter().enumerate().skip(1) {
        // Image y grows downwards, so "above" is a smaller y.
        fingers[finger] = hand.get(tip_id).y < hand.get(tip_id - 2).y;
    }

    Some(FingerStates(fingers))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An upright right hand with every finger straight.
    pub(crate) fn open_hand() -> LandmarkSet {
        let mut points = [Point::default(); LANDMARK_COUNT];
        points[0] = Point::new(200.0, 400.0);
        // thumb: cmc, mcp, ip, tip moving outwards to the right
        points[1] = Point::new(240.0, 380.0);
        points[2] = Point::new(270.0, 350.0);
        points[THUMB_IP] = Point::new(295.0, 325.0);
        points[THUMB_TIP] = Point::new(320.0, 300.0);
        for (finger, base_x) in [(1usize, 180.0f32), (2, 200.0), (3, 220.0), (4, 240.0)] {
            let tip = TIP_IDS[finger];
            points[tip - 3] = Point::new(base_x, 300.0);
            points[tip - 2] = Point::new(base_x, 250.0);
            points[tip - 1] = Point::new(base_x, 210.0);
            points[tip] = Point::new(base_x, 170.0);
        }
        LandmarkSet::new(points)
    }

    /// A fist: fingertips curled below the middle joints, thumb tucked in.
    pub(crate) fn fist() -> LandmarkSet {
        let mut points = *open_hand().points();
        points[THUMB_IP] = Point::new(260.0, 340.0);
        points[THUMB_TIP] = Point::new(230.0, 330.0);
        for &tip in &TIP_IDS[1..] {
            let pip = points[tip - 2];
            points[tip] = Point::new(pip.x, pip.y + 30.0);
            points[tip - 1] = Point::new(pip.x, pip.y + 15.0);
        }
        LandmarkSet::new(points)
    }

    /// Raise the first `n` non-thumb fingers of a fist.
    pub(crate) fn fist_with_fingers(n: usize) -> LandmarkSet {
        let open = open_hand();
        let mut points = *fist().points();
        for &tip in TIP_IDS[1..].iter().take(n) {
            points[tip] = open.get(tip);
            points[tip - 1] = open.get(tip - 1);
        }
        LandmarkSet::new(points)
    }

    #[test]
    fn test_open_hand_counts_five() {
        let states = classify(Some(&open_hand())).unwrap();
        assert_eq!(states, FingerStates([true; 5]));
        assert_eq!(states.count(), 5);
    }

    #[test]
    fn test_fist_counts_zero() {
        let states = classify(Some(&fist())).unwrap();
        assert_eq!(states.count(), 0);
        assert!(!states.0[0]);
    }

    #[test]
    fn test_no_hand_is_not_a_fist() {
        assert_eq!(classify(None), None);
        assert_ne!(classify(None), classify(Some(&fist())));
    }

    #[test]
    fn test_partial_fingers() {
        for n in 0..=4 {
            let states = classify(Some(&fist_with_fingers(n))).unwrap();
            assert_eq!(states.count(), n);
            assert!(!states.0[0]);
        }
    }

    #[test]
    fn test_thumb_only() {
        let open = open_hand();
        let mut points = *fist().points();
        points[THUMB_IP] = open.get(THUMB_IP);
        points[THUMB_TIP] = open.get(THUMB_TIP);
        let states = classify(Some(&LandmarkSet::new(points))).unwrap();
        assert_eq!(states, FingerStates([true, false, false, false, false]));
    }

    #[test]
    fn test_equal_coordinates_are_not_extended() {
        let points = [Point::new(10.0, 10.0); LANDMARK_COUNT];
        let states = classify(Some(&LandmarkSet::new(points))).unwrap();
        assert_eq!(states.count(), 0);
    }

    #[test]
    fn test_try_from_slice_length() {
        let points = vec![Point::default(); LANDMARK_COUNT];
        assert!(LandmarkSet::try_from(points.as_slice()).is_ok());
        assert!(LandmarkSet::try_from(&points[..20]).is_err());
        let empty: &[Point] = &[];
        assert!(LandmarkSet::try_from(empty).is_err());
    }
}
