//! Melody source seam and seed sequences.
//!
//! The note model itself lives outside this crate. Anything that can hand
//! over one note at a time implements [`MelodySource`].

use crate::error::{Error, Result};
use crate::types::Note;
use log::{info, warn};
use std::path::Path;

pub trait MelodySource: Send {
    /// Next melody note, or `None` when the source is exhausted.
    fn next_note(&mut self, temperature: f64) -> Option<Note>;

    fn name(&self) -> &str;
}

/// Number of notes in the model's input window.
pub const SEQUENCE_LENGTH: usize = 25;

/// A priming sequence of (pitch, step, duration) triples.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub notes: Vec<Note>,
}

impl Seed {
    /// C major scale cycled to `len` notes from middle C, half-second steps.
    pub fn c_major(len: usize) -> Self {
        const SCALE: [u8; 8] = [0, 2, 4, 5, 7, 9, 11, 12];
        let notes = (0..len)
            .map(|i| Note::new(60 + SCALE[i % SCALE.len()], 0.5, 0.4, 80))
            .collect();
        Self { notes }
    }

    /// Parse a JSON array of `[pitch, step, duration]` triples.
    pub fn from_json(text: &str) -> Result<Self> {
        let rows: Vec<(f64, f64, f64)> = serde_json::from_str(text)?;
        if rows.is_empty() {
            return Err(Error::InvalidConfig("seed sequence is empty".into()));
        }
        let notes = rows
            .into_iter()
            .map(|(pitch, step, duration)| {
                Note::new(pitch.round().clamp(0.0, 127.0) as u8, step, duration.max(0.0), 80)
            })
            .collect();
        Ok(Self { notes })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let seed = Self::from_json(&text)?;
        info!("Loaded seed sequence from {} ({} notes)", path.display(), seed.notes.len());
        Ok(seed)
    }

    /// Load `path` if given, falling back to the C major seed on any error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => match Self::load(p) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Could not load seed {}: {}; using C major seed", p.display(), e);
                    Self::c_major(SEQUENCE_LENGTH)
                }
            },
            None => {
                info!("Using default C major scale seed");
                Self::c_major(SEQUENCE_LENGTH)
            }
        }
    }
}

/// Replays a fixed list of notes once. Handy for scripted runs and tests.
pub struct ScriptedMelody {
    notes: std::vec::IntoIter<Note>,
}

impl ScriptedMelody {
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            notes: notes.into_iter(),
        }
    }
}

impl MelodySource for ScriptedMelody {
    fn next_note(&mut self, _temperature: f64) -> Option<Note> {
        self.notes.next()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_seed() {
        let seed = Seed::c_major(SEQUENCE_LENGTH);
        assert_eq!(seed.notes.len(), 25);
        let pitches: Vec<u8> = seed.notes.iter().take(9).map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 62, 64, 65, 67, 69, 71, 72, 60]);
        assert!(seed.notes.iter().all(|n| n.onset_offset == 0.5 && n.duration == 0.4));
    }

    #[test]
    fn test_seed_from_json() {
        let seed = Seed::from_json("[[64, 0.25, 0.5], [200, 0.1, 0.2]]").unwrap();
        assert_eq!(seed.notes.len(), 2);
        assert_eq!(seed.notes[0].pitch, 64);
        assert_eq!(seed.notes[0].onset_offset, 0.25);
        assert_eq!(seed.notes[1].pitch, 127);
    }

    #[test]
    fn test_bad_seed_falls_back() {
        assert!(Seed::from_json("[]").is_err());
        assert!(Seed::from_json("{\"not\":\"a seed\"}").is_err());
        let seed = Seed::load_or_default(Some(Path::new("/nonexistent/seed.json")));
        assert_eq!(seed, Seed::c_major(SEQUENCE_LENGTH));
    }

    #[test]
    fn test_scripted_melody_runs_out() {
        let mut m = ScriptedMelody::new(Seed::c_major(3).notes);
        assert_eq!(m.next_note(1.0).unwrap().pitch, 60);
        assert_eq!(m.next_note(1.0).unwrap().pitch, 62);
        assert_eq!(m.next_note(1.0).unwrap().pitch, 64);
        assert!(m.next_note(1.0).is_none());
    }
}
