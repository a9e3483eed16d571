//! Hand pose classification over the 21-point hand landmark layout, and the
//! tracker seam the gesture loop reads from.
//!
//! Landmark extraction itself happens upstream; this module only looks at
//! where the fingertips sit relative to their middle joints.

use crate::error::Result;
use crate::types::{Gesture, HandObservation, Handedness, Landmark, LANDMARK_COUNT};

pub const WRIST: usize = 0;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// Thumb and index tips closer than this (normalized units) count as touching.
pub const OK_SIGN_DISTANCE: f32 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FingerState {
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerState {
    pub fn count(&self) -> u8 {
        [self.thumb, self.index, self.middle, self.ring, self.pinky]
            .iter()
            .filter(|&&f| f)
            .count() as u8
    }
}

/// Which fingers are extended. Image y grows downward, so an extended
/// finger has its tip above its PIP joint. The thumb folds sideways and is
/// judged on x, mirrored by handedness.
pub fn finger_state(lm: &[Landmark; LANDMARK_COUNT], handedness: Handedness) -> FingerState {
    let thumb = match handedness {
        Handedness::Right => lm[THUMB_TIP].x < lm[THUMB_IP].x,
        Handedness::Left => lm[THUMB_TIP].x > lm[THUMB_IP].x,
    };
    FingerState {
        thumb,
        index: lm[INDEX_TIP].y < lm[INDEX_PIP].y,
        middle: lm[MIDDLE_TIP].y < lm[MIDDLE_PIP].y,
        ring: lm[RING_TIP].y < lm[RING_PIP].y,
        pinky: lm[PINKY_TIP].y < lm[PINKY_PIP].y,
    }
}

/// First matching rule wins.
pub fn classify(lm: &[Landmark; LANDMARK_COUNT], handedness: Handedness) -> Gesture {
    let f = finger_state(lm, handedness);
    let n = f.count();

    if n == 5 {
        return Gesture::OpenPalm;
    }
    if n == 0 {
        return Gesture::ClosedFist;
    }
    if f.index && f.middle && !f.ring && !f.pinky {
        return Gesture::PeaceSign;
    }
    if f.index && !f.middle && !f.ring && !f.pinky {
        return Gesture::Pointing;
    }
    if f.thumb && n == 1 {
        return Gesture::ThumbsUp;
    }
    if thumb_index_distance(lm) < OK_SIGN_DISTANCE && f.middle && f.ring && f.pinky {
        return Gesture::OkSign;
    }
    if f.index && f.pinky && !f.middle && !f.ring {
        return Gesture::RockOn;
    }
    match n {
        3 => Gesture::ThreeFingers,
        4 => Gesture::FourFingers,
        _ => Gesture::Other(n),
    }
}

pub fn thumb_index_distance(lm: &[Landmark; LANDMARK_COUNT]) -> f32 {
    lm[THUMB_TIP].distance_2d(&lm[INDEX_TIP])
}

impl HandObservation {
    /// Upstream classification if supplied, otherwise computed here.
    pub fn resolved_gesture(&self) -> Gesture {
        self.gesture
            .unwrap_or_else(|| classify(&self.landmarks, self.handedness))
    }

    pub fn index_tip(&self) -> Landmark {
        self.landmarks[INDEX_TIP]
    }

    pub fn pinch_distance(&self) -> f32 {
        thumb_index_distance(&self.landmarks)
    }
}

/// Source of per-frame hand observations.
///
/// `Ok(None)` means the frame had no hand. An `Err` is terminal: the
/// gesture loop stops and the rest of the performance carries on.
pub trait HandTracker: Send {
    fn next_observation(&mut self) -> Result<Option<HandObservation>>;

    fn name(&self) -> &str;
}

/// Build a landmark set whose finger layout classifies as `gesture`, with
/// the index fingertip at `index_tip` and the thumb tip `pinch` to its left.
///
/// Used by the simulated tracker and by tests.
pub fn synthetic_hand(
    gesture: Gesture,
    index_tip: (f32, f32),
    pinch: f32,
    handedness: Handedness,
) -> HandObservation {
    let f = match gesture {
        Gesture::OpenPalm => FingerState { thumb: true, index: true, middle: true, ring: true, pinky: true },
        Gesture::ClosedFist => FingerState::default(),
        Gesture::PeaceSign => FingerState { index: true, middle: true, ..Default::default() },
        Gesture::Pointing => FingerState { index: true, ..Default::default() },
        Gesture::ThumbsUp => FingerState { thumb: true, ..Default::default() },
        Gesture::RockOn => FingerState { index: true, pinky: true, ..Default::default() },
        Gesture::OkSign => FingerState { middle: true, ring: true, pinky: true, ..Default::default() },
        Gesture::ThreeFingers => FingerState { index: true, middle: true, ring: true, ..Default::default() },
        Gesture::FourFingers => FingerState { index: true, middle: true, ring: true, pinky: true, ..Default::default() },
        Gesture::Other(_) => FingerState { thumb: true, index: true, ..Default::default() },
    };

    let (x, y) = index_tip;
    let mut lm = [Landmark::new(x, y + 0.25); LANDMARK_COUNT];

    // Tip 0.1 above its PIP when extended, 0.05 below when curled; the
    // index tip stays pinned at (x, y).
    let pip_y = if f.index { y + 0.1 } else { y - 0.05 };
    let finger = |extended: bool, dx: f32| {
        let tip_y = if extended { pip_y - 0.1 } else { pip_y + 0.05 };
        (Landmark::new(x + dx, pip_y), Landmark::new(x + dx, tip_y))
    };
    for (pip, tip, extended, dx) in [
        (INDEX_PIP, INDEX_TIP, f.index, 0.0),
        (MIDDLE_PIP, MIDDLE_TIP, f.middle, 0.03),
        (RING_PIP, RING_TIP, f.ring, 0.06),
        (PINKY_PIP, PINKY_TIP, f.pinky, 0.09),
    ] {
        let (p, t) = finger(extended, dx);
        lm[pip] = p;
        lm[tip] = t;
    }
    lm[INDEX_TIP] = Landmark::new(x, y);

    let thumb_tip = Landmark::new(x - pinch, y);
    // Extended thumb points away from the palm: smaller x on a right hand
    let outward = match handedness {
        Handedness::Right => 0.03,
        Handedness::Left => -0.03,
    };
    let ip_dx = if f.thumb { outward } else { -outward };
    lm[THUMB_TIP] = thumb_tip;
    lm[THUMB_IP] = Landmark::new(thumb_tip.x + ip_dx, y + 0.05);
    lm[WRIST] = Landmark::new(x, y + 0.3);

    HandObservation {
        landmarks: lm,
        handedness,
        gesture: None,
    }
}
