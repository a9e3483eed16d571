//! Rule-based second voice.
//!
//! For every melody note a semitone interval is drawn from the style's
//! weighted table and added to the melody pitch. The harmony starts with the
//! melody, is a little shorter and a little quieter.

use crate::error::{Error, Result};
use crate::types::Note;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

pub const HARMONY_DURATION_RATIO: f64 = 0.95;
pub const HARMONY_VELOCITY_RATIO: f64 = 0.8;
pub const DEFAULT_HISTORY_CAPACITY: usize = 8;
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

// ─── Styles and profiles ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarmonyStyle {
    Classical,
    Jazz,
    Modern,
}

impl HarmonyStyle {
    pub const ALL: [HarmonyStyle; 3] = [HarmonyStyle::Classical, HarmonyStyle::Jazz, HarmonyStyle::Modern];

    /// Interval table and default weights.
    fn table(self) -> (&'static [i8], &'static [f64]) {
        match self {
            // Fifths and thirds either side
            HarmonyStyle::Classical => (
                &[-7, -5, -4, -3, 3, 4, 5, 7],
                &[0.25, 0.20, 0.15, 0.15, 0.10, 0.05, 0.05, 0.05],
            ),
            // Adds the minor seventh above
            HarmonyStyle::Jazz => (
                &[-7, -5, -4, -3, 3, 4, 7, 10],
                &[0.20, 0.15, 0.15, 0.15, 0.10, 0.10, 0.10, 0.05],
            ),
            // Octaves, seconds
            HarmonyStyle::Modern => (
                &[-12, -7, -5, -2, 2, 5, 7, 12],
                &[0.15, 0.20, 0.15, 0.10, 0.10, 0.10, 0.10, 0.10],
            ),
        }
    }
}

impl FromStr for HarmonyStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classical" => Ok(HarmonyStyle::Classical),
            "jazz" => Ok(HarmonyStyle::Jazz),
            "modern" => Ok(HarmonyStyle::Modern),
            _ => Err(Error::UnknownHarmonyStyle(s.to_string())),
        }
    }
}

impl fmt::Display for HarmonyStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HarmonyStyle::Classical => "classical",
            HarmonyStyle::Jazz => "jazz",
            HarmonyStyle::Modern => "modern",
        };
        f.write_str(name)
    }
}

/// Immutable interval table with a categorical distribution over it.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonyProfile {
    style: HarmonyStyle,
    intervals: Vec<i8>,
    weights: Vec<f64>,
}

impl HarmonyProfile {
    /// Validate a table. Weights that are non-negative but do not sum to 1.0
    /// are renormalized (with a warning); anything else is rejected.
    pub fn new(style: HarmonyStyle, intervals: Vec<i8>, weights: Vec<f64>) -> Result<Self> {
        if intervals.is_empty() {
            return Err(Error::InvalidProfile(format!("{}: no intervals", style)));
        }
        if intervals.len() != weights.len() {
            return Err(Error::InvalidProfile(format!(
                "{}: {} intervals but {} weights",
                style,
                intervals.len(),
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(Error::InvalidProfile(format!("{}: bad weight {}", style, w)));
        }
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            return Err(Error::InvalidProfile(format!("{}: weights sum to zero", style)));
        }

        let weights = if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            warn!("harmony: {} weights sum to {:.4}, renormalizing", style, sum);
            weights.iter().map(|w| w / sum).collect()
        } else {
            weights
        };

        Ok(Self {
            style,
            intervals,
            weights,
        })
    }

    /// Built-in profile for a style.
    pub fn for_style(style: HarmonyStyle) -> Self {
        let (intervals, weights) = style.table();
        Self {
            style,
            intervals: intervals.to_vec(),
            weights: weights.to_vec(),
        }
    }

    /// Look up a built-in profile by name; fails with `UnknownHarmonyStyle`.
    pub fn by_name(name: &str) -> Result<Self> {
        Ok(Self::for_style(name.parse()?))
    }

    /// Built-in intervals for `style` with custom weights.
    pub fn with_weights(style: HarmonyStyle, weights: Vec<f64>) -> Result<Self> {
        let (intervals, _) = style.table();
        Self::new(style, intervals.to_vec(), weights)
    }

    pub fn style(&self) -> HarmonyStyle {
        self.style
    }

    pub fn intervals(&self) -> &[i8] {
        &self.intervals
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Draw one interval from the categorical distribution.
    pub fn sample_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> i8 {
        let mut r: f64 = rng.gen_range(0.0..1.0);
        for (&interval, &w) in self.intervals.iter().zip(&self.weights) {
            if r < w {
                return interval;
            }
            r -= w;
        }
        // Rounding left a sliver past the last bucket
        self.intervals[self.intervals.len() - 1]
    }
}

// ─── History ────────────────────────────────────────────────────────────────

/// The last `capacity` melody notes, oldest first.
#[derive(Debug, Clone)]
pub struct MelodyHistory {
    notes: VecDeque<Note>,
    capacity: usize,
}

impl MelodyHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            notes: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, note: Note) {
        self.notes.push_back(note);
        while self.notes.len() > self.capacity {
            self.notes.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter()
    }

    pub fn latest(&self) -> Option<&Note> {
        self.notes.back()
    }
}

impl Default for MelodyHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ─── Generation ─────────────────────────────────────────────────────────────

/// Derive the harmony note for `melody`, then record `melody` in `history`.
///
/// `history` is accepted for context-aware rules; the weighted rule does
/// not read it.
pub fn generate_harmony<R: Rng + ?Sized>(
    melody: &Note,
    history: &mut MelodyHistory,
    profile: &HarmonyProfile,
    rng: &mut R,
) -> Note {
    let interval = profile.sample_interval(rng);
    let harmony = Note {
        pitch: resolve_pitch(melody.pitch, interval, profile),
        onset_offset: melody.onset_offset,
        duration: melody.duration * HARMONY_DURATION_RATIO,
        velocity: harmony_velocity(melody.velocity),
    };
    history.push(*melody);
    harmony
}

/// `melody + interval` if that is a valid pitch; otherwise the
/// smallest-magnitude interval of the profile that stays in range;
/// otherwise unison.
fn resolve_pitch(melody: u8, interval: i8, profile: &HarmonyProfile) -> u8 {
    let in_range = |i: i8| {
        let p = melody as i16 + i as i16;
        (0..=127).contains(&p).then_some(p as u8)
    };
    if let Some(p) = in_range(interval) {
        return p;
    }
    profile
        .intervals()
        .iter()
        .filter_map(|&i| in_range(i).map(|p| (i.unsigned_abs(), p)))
        .min_by_key(|&(mag, p)| (mag, p))
        .map(|(_, p)| p)
        .unwrap_or(melody)
}

pub fn harmony_velocity(melody_velocity: u8) -> u8 {
    (melody_velocity as f64 * HARMONY_VELOCITY_RATIO)
        .round()
        .clamp(0.0, 127.0) as u8
}

/// Profile, history and RNG bundled for the melody thread.
pub struct HarmonyGenerator {
    profile: HarmonyProfile,
    history: MelodyHistory,
    rng: StdRng,
}

impl HarmonyGenerator {
    pub fn new(profile: HarmonyProfile, history_capacity: usize, seed: Option<u64>) -> Self {
        info!(
            "harmony: style={} intervals={:?} history={}",
            profile.style(),
            profile.intervals(),
            history_capacity
        );
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            profile,
            history: MelodyHistory::new(history_capacity),
            rng,
        }
    }

    pub fn next(&mut self, melody: &Note) -> Note {
        generate_harmony(melody, &mut self.history, &self.profile, &mut self.rng)
    }

    pub fn profile(&self) -> &HarmonyProfile {
        &self.profile
    }

    pub fn history(&self) -> &MelodyHistory {
        &self.history
    }
}
