use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ─── Notes ──────────────────────────────────────────────────────────────────

/// A single pitched event, as produced by the melody source or derived by
/// the harmony generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch 0–127
    pub pitch: u8,
    /// Seconds since the previous note-on (the model's "step")
    pub onset_offset: f64,
    /// Seconds the note is held
    pub duration: f64,
    /// MIDI velocity 0–127
    pub velocity: u8,
}

impl Note {
    pub fn new(pitch: u8, onset_offset: f64, duration: f64, velocity: u8) -> Self {
        Self {
            pitch: pitch.min(127),
            onset_offset: onset_offset.max(0.0),
            duration,
            velocity: velocity.min(127),
        }
    }

    pub fn name(&self) -> String {
        pitch_to_name(self.pitch)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<4} (pitch={:>3}) step={:5.3}s dur={:5.3}s vel={}",
            self.name(),
            self.pitch,
            self.onset_offset,
            self.duration,
            self.velocity
        )
    }
}

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Scientific pitch name, middle C (60) = "C4".
pub fn pitch_to_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[pitch as usize % 12], octave)
}

// ─── MIDI wire events ───────────────────────────────────────────────────────

/// Everything this program ever puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiEvent {
    pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> Self {
        MidiEvent::NoteOn { channel, pitch, velocity }
    }

    pub fn note_off(channel: u8, pitch: u8) -> Self {
        MidiEvent::NoteOff { channel, pitch }
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        MidiEvent::ControlChange { channel, controller, value }
    }

    /// Encode as a three-byte channel voice message.
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiEvent::NoteOn { channel, pitch, velocity } => {
                [0x90 | (channel & 0x0F), pitch & 0x7F, velocity & 0x7F]
            }
            MidiEvent::NoteOff { channel, pitch } => [0x80 | (channel & 0x0F), pitch & 0x7F, 0],
            MidiEvent::ControlChange { channel, controller, value } => {
                [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F]
            }
        }
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiEvent::NoteOn { channel, pitch, velocity } => {
                write!(f, "note_on ch={} {} vel={}", channel, pitch_to_name(pitch), velocity)
            }
            MidiEvent::NoteOff { channel, pitch } => {
                write!(f, "note_off ch={} {}", channel, pitch_to_name(pitch))
            }
            MidiEvent::ControlChange { channel, controller, value } => {
                write!(f, "cc ch={} #{}={}", channel, controller, value)
            }
        }
    }
}

// ─── Controller table ───────────────────────────────────────────────────────

// Stable contract with the DAW mappings. Do not renumber.
pub const CC_MODULATION: u8 = 1;
pub const CC_EXPRESSION: u8 = 11;
pub const CC_RESONANCE: u8 = 71;
pub const CC_FILTER_CUTOFF: u8 = 74;
pub const CC_REVERB: u8 = 91;
pub const CC_CHORUS: u8 = 93;

/// Controllers zeroed when the output channel closes.
pub const RESET_CCS: [u8; 6] = [
    CC_MODULATION,
    CC_EXPRESSION,
    CC_RESONANCE,
    CC_FILTER_CUTOFF,
    CC_REVERB,
    CC_CHORUS,
];

/// Look up a controller by the short names used on the command line.
pub fn cc_by_name(name: &str) -> Option<(u8, &'static str)> {
    match name.to_ascii_lowercase().as_str() {
        "filter" | "cutoff" | "filter-cutoff" => Some((CC_FILTER_CUTOFF, "Filter Cutoff")),
        "resonance" => Some((CC_RESONANCE, "Resonance")),
        "reverb" | "delay" => Some((CC_REVERB, "Reverb/Delay")),
        "chorus" => Some((CC_CHORUS, "Chorus")),
        "modulation" | "mod" => Some((CC_MODULATION, "Modulation")),
        _ => None,
    }
}

/// Current hand-derived controller values, keyed by CC number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    values: BTreeMap<u8, u8>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, cc_number: u8, value: u8) {
        self.values.insert(cc_number & 0x7F, value.min(127));
    }

    pub fn get(&self, cc_number: u8) -> Option<u8> {
        self.values.get(&cc_number).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.values.iter().map(|(&cc, &v)| (cc, v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ─── Hand observations ──────────────────────────────────────────────────────

/// One normalized landmark from the vision collaborator.
/// x grows to the right, y grows downward, both in 0.0–1.0 image space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn distance_2d(&self, other: &Landmark) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

pub const LANDMARK_COUNT: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

/// Discrete hand pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gesture {
    OpenPalm,
    ClosedFist,
    PeaceSign,
    Pointing,
    ThumbsUp,
    OkSign,
    RockOn,
    ThreeFingers,
    FourFingers,
    /// Anything else; carries the number of extended fingers.
    Other(u8),
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gesture::OpenPalm => write!(f, "Open Palm"),
            Gesture::ClosedFist => write!(f, "Closed Fist"),
            Gesture::PeaceSign => write!(f, "Peace Sign"),
            Gesture::Pointing => write!(f, "Pointing"),
            Gesture::ThumbsUp => write!(f, "Thumbs Up"),
            Gesture::OkSign => write!(f, "OK Sign"),
            Gesture::RockOn => write!(f, "Rock On"),
            Gesture::ThreeFingers => write!(f, "Three Fingers"),
            Gesture::FourFingers => write!(f, "Four Fingers"),
            Gesture::Other(n) => write!(f, "{} Fingers Extended", n),
        }
    }
}

/// A single tracked hand in one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandObservation {
    pub landmarks: [Landmark; LANDMARK_COUNT],
    pub handedness: Handedness,
    /// Classification supplied upstream; computed locally when absent.
    #[serde(default)]
    pub gesture: Option<Gesture>,
}

// ─── Visualization feed ─────────────────────────────────────────────────────

/// JSON message pushed to visualization clients for every melody note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizNote {
    #[serde(rename = "type")]
    pub kind: String,
    pub pitch: u8,
    pub step: f64,
    pub duration: f64,
    pub velocity: u8,
    pub note_name: String,
    /// Local wall-clock time, ISO 8601
    pub timestamp: String,
    pub index: u64,
}

impl VizNote {
    pub fn from_note(note: &Note, index: u64) -> Self {
        Self {
            kind: "note".to_string(),
            pitch: note.pitch,
            step: note.onset_offset,
            duration: note.duration,
            velocity: note.velocity,
            note_name: note.name(),
            timestamp: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_names() {
        assert_eq!(pitch_to_name(60), "C4");
        assert_eq!(pitch_to_name(61), "C#4");
        assert_eq!(pitch_to_name(0), "C-1");
        assert_eq!(pitch_to_name(127), "G9");
        assert_eq!(pitch_to_name(69), "A4");
    }

    #[test]
    fn test_event_bytes() {
        assert_eq!(MidiEvent::note_on(0, 60, 80).to_bytes(), [0x90, 60, 80]);
        assert_eq!(MidiEvent::note_off(2, 60).to_bytes(), [0x82, 60, 0]);
        assert_eq!(
            MidiEvent::control_change(0, CC_FILTER_CUTOFF, 127).to_bytes(),
            [0xB0, 74, 127]
        );
        // Out-of-range data bytes are masked, channel wraps into 0–15
        assert_eq!(MidiEvent::note_on(17, 200, 255).to_bytes(), [0x91, 72, 127]);
    }

    #[test]
    fn test_viz_note_json_shape() {
        let note = Note::new(64, 0.25, 0.5, 80);
        let json = serde_json::to_value(VizNote::from_note(&note, 3)).unwrap();
        assert_eq!(json["type"], "note");
        assert_eq!(json["pitch"], 64);
        assert_eq!(json["note_name"], "E4");
        assert_eq!(json["index"], 3);
        assert!(json["step"].is_number());
        assert!(json["duration"].is_number());
        assert!(json["velocity"].is_number());
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_cc_names() {
        assert_eq!(cc_by_name("filter").unwrap().0, 74);
        assert_eq!(cc_by_name("Resonance").unwrap().0, 71);
        assert_eq!(cc_by_name("reverb").unwrap().0, 91);
        assert_eq!(cc_by_name("chorus").unwrap().0, 93);
        assert_eq!(cc_by_name("modulation").unwrap().0, 1);
        assert!(cc_by_name("volume").is_none());
    }

    #[test]
    fn test_hand_observation_parses_without_gesture() {
        let lm: Vec<String> = (0..LANDMARK_COUNT)
            .map(|i| format!(r#"{{"x":{},"y":0.5}}"#, i as f32 / 21.0))
            .collect();
        let json = format!(
            r#"{{"landmarks":[{}],"handedness":"Right"}}"#,
            lm.join(",")
        );
        let obs: HandObservation = serde_json::from_str(&json).unwrap();
        assert_eq!(obs.handedness, Handedness::Right);
        assert!(obs.gesture.is_none());
        assert_eq!(obs.landmarks[0].z, 0.0);
    }
}
