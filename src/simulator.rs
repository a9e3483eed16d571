use crate::error::Result;
use crate::gesture::{synthetic_hand, HandTracker};
use crate::melody::{MelodySource, Seed, SEQUENCE_LENGTH};
use crate::types::*;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

// ─── Melody ─────────────────────────────────────────────────────────────────

/// Stand-in for the note model: a temperature-controlled random walk over
/// the pitch classes of the seed, with timing drawn around the recent
/// window's average step and duration.
///
/// Low temperature keeps to stepwise motion and steady rhythm; high
/// temperature leaps and varies note lengths.
pub struct ScaleWalk {
    window: VecDeque<Note>,
    ladder: Vec<u8>,
    position: usize,
    home: usize,
    rng: StdRng,
}

const MOVES: [i32; 7] = [-3, -2, -1, 0, 1, 2, 3];
const TIMING_FACTORS: [f64; 4] = [0.5, 1.0, 1.5, 2.0];
const TIMING_LOGITS: [f64; 4] = [-1.0, 0.0, -1.0, -2.0];

impl ScaleWalk {
    pub fn new(seed: &Seed, rng_seed: Option<u64>) -> Self {
        let mut classes = [false; 12];
        for n in &seed.notes {
            classes[(n.pitch % 12) as usize] = true;
        }
        if !classes.iter().any(|&c| c) {
            classes = [true; 12];
        }
        let ladder: Vec<u8> = (24..=108u8).filter(|p| classes[(p % 12) as usize]).collect();

        let last = seed.notes.last().map(|n| n.pitch).unwrap_or(60);
        let nearest = |target: u8| {
            ladder
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.abs_diff(target))
                .map(|(i, _)| i)
                .unwrap_or(0)
        };
        let position = nearest(last);
        let home = if seed.notes.is_empty() {
            position
        } else {
            let mean = seed.notes.iter().map(|n| n.pitch as u32).sum::<u32>() / seed.notes.len() as u32;
            nearest(mean as u8)
        };

        let mut window: VecDeque<Note> = seed.notes.iter().copied().collect();
        if window.is_empty() {
            window.push_back(Note::new(last, 0.5, 0.4, 80));
        }

        Self {
            window,
            ladder,
            position,
            home,
            rng: match rng_seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_entropy(),
            },
        }
    }

    fn mean_timing(&self) -> (f64, f64) {
        let n = self.window.len() as f64;
        let step = self.window.iter().map(|n| n.onset_offset).sum::<f64>() / n;
        let dur = self.window.iter().map(|n| n.duration).sum::<f64>() / n;
        (step, dur)
    }
}

impl MelodySource for ScaleWalk {
    fn next_note(&mut self, temperature: f64) -> Option<Note> {
        let temperature = temperature.max(0.05);

        // Small moves are likelier; drifting from home tilts moves back
        let drift = self.home as f64 - self.position as f64;
        let logits: Vec<f64> = MOVES
            .iter()
            .map(|&k| -1.2 * k.abs() as f64 + 0.05 * drift * k as f64)
            .collect();
        let k = MOVES[sample_softmax(&logits, temperature, &mut self.rng)];
        let top = self.ladder.len() as i32 - 1;
        self.position = (self.position as i32 + k).clamp(0, top) as usize;

        let (step, dur) = self.mean_timing();
        let factor = TIMING_FACTORS[sample_softmax(&TIMING_LOGITS, temperature, &mut self.rng)];
        let note = Note::new(
            self.ladder[self.position],
            step * factor,
            (dur * factor).max(0.01),
            80,
        );

        self.window.push_back(note);
        while self.window.len() > SEQUENCE_LENGTH {
            self.window.pop_front();
        }
        Some(note)
    }

    fn name(&self) -> &str {
        "scale-walk"
    }
}

/// Index drawn from softmax(logits / temperature).
fn sample_softmax<R: Rng + ?Sized>(logits: &[f64], temperature: f64, rng: &mut R) -> usize {
    let scaled: Vec<f64> = logits.iter().map(|l| l / temperature).collect();
    let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    let mut r = rng.gen_range(0.0..total);
    for (i, e) in exps.iter().enumerate() {
        if r < *e {
            return i;
        }
        r -= e;
    }
    exps.len() - 1
}

// ─── Hand ───────────────────────────────────────────────────────────────────

/// Generates a scripted hand performance without a camera: glides across
/// the frame, pinches, pose changes and the occasional exit from view.
pub struct SimulatedTracker {
    moves: Vec<Move>,
    step: usize,
    frame_in_step: u32,
    from: HandState,
    state: HandState,
    fps: f32,
    realtime: bool,
}

#[derive(Clone, Copy)]
struct HandState {
    x: f32,
    y: f32,
    pinch: f32,
    gesture: Gesture,
    present: bool,
}

enum Move {
    Hold { ms: u32 },
    Glide { x: f32, y: f32, ms: u32 },
    Pinch { to: f32, ms: u32 },
    Pose(Gesture),
    /// Hand out of frame.
    Away { ms: u32 },
}

impl SimulatedTracker {
    pub fn new(fps: f32) -> Self {
        Self {
            moves: demo_moves(),
            step: 0,
            frame_in_step: 0,
            from: HandState::start(),
            state: HandState::start(),
            fps: fps.max(1.0),
            realtime: true,
        }
    }

    /// Produce frames as fast as they are requested (tests, offline runs).
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn frames_for(&self, ms: u32) -> u32 {
        ((ms as f32 * self.fps / 1000.0).round() as u32).max(1)
    }

    /// Advance one frame through the move list (looping).
    fn advance(&mut self) {
        loop {
            let (frames, target) = match self.moves[self.step] {
                Move::Pose(g) => {
                    debug!("sim: pose {}", g);
                    self.state.gesture = g;
                    self.next_step();
                    continue;
                }
                Move::Hold { ms } => (self.frames_for(ms), None),
                Move::Away { ms } => (self.frames_for(ms), None),
                Move::Glide { x, y, ms } => (self.frames_for(ms), Some((Some((x, y)), None))),
                Move::Pinch { to, ms } => (self.frames_for(ms), Some((None, Some(to)))),
            };

            if self.frame_in_step == 0 {
                self.from = self.state;
            }
            self.frame_in_step += 1;
            let t = smoothstep(self.frame_in_step as f32 / frames as f32);

            self.state.present = !matches!(self.moves[self.step], Move::Away { .. });
            if let Some((pos, pinch)) = target {
                if let Some((x, y)) = pos {
                    self.state.x = lerp(self.from.x, x, t);
                    self.state.y = lerp(self.from.y, y, t);
                }
                if let Some(to) = pinch {
                    self.state.pinch = lerp(self.from.pinch, to, t);
                }
            }

            if self.frame_in_step >= frames {
                self.next_step();
            }
            return;
        }
    }

    fn next_step(&mut self) {
        self.frame_in_step = 0;
        self.step = (self.step + 1) % self.moves.len();
    }
}

impl HandState {
    fn start() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            pinch: 0.1,
            gesture: Gesture::Pointing,
            present: true,
        }
    }
}

impl HandTracker for SimulatedTracker {
    fn next_observation(&mut self) -> Result<Option<HandObservation>> {
        if self.realtime {
            thread::sleep(Duration::from_secs_f32(1.0 / self.fps));
        }
        self.advance();
        let s = self.state;
        Ok(s.present.then(|| synthetic_hand(s.gesture, (s.x, s.y), s.pinch, Handedness::Right)))
    }

    fn name(&self) -> &str {
        "simulated hand"
    }
}

/// Roughly 20 seconds of hand movement touching every controller, looped.
fn demo_moves() -> Vec<Move> {
    info!("sim: using scripted hand performance");
    vec![
        Move::Hold { ms: 500 },
        // Filter sweep left → right
        Move::Glide { x: 0.1, y: 0.5, ms: 1000 },
        Move::Glide { x: 0.9, y: 0.5, ms: 2000 },
        // Raise the hand for reverb
        Move::Glide { x: 0.9, y: 0.15, ms: 1200 },
        Move::Pose(Gesture::OpenPalm),
        Move::Hold { ms: 1500 },
        // Resonance: open and close the pinch
        Move::Pose(Gesture::Pointing),
        Move::Pinch { to: 0.3, ms: 800 },
        Move::Pinch { to: 0.02, ms: 800 },
        Move::Pose(Gesture::PeaceSign),
        Move::Glide { x: 0.4, y: 0.6, ms: 1500 },
        // Hand briefly leaves frame; controllers hold
        Move::Away { ms: 1000 },
        Move::Pose(Gesture::RockOn),
        Move::Glide { x: 0.2, y: 0.3, ms: 1500 },
        Move::Hold { ms: 1000 },
        Move::Pose(Gesture::ClosedFist),
        Move::Glide { x: 0.5, y: 0.8, ms: 2000 },
        Move::Pinch { to: 0.1, ms: 500 },
        Move::Pose(Gesture::Pointing),
        Move::Glide { x: 0.5, y: 0.5, ms: 1000 },
    ]
}

// ─── Math helpers ───────────────────────────────────────────────────────────

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Smooth interpolation (ease in/out)
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_walk_stays_in_key() {
        let seed = Seed::c_major(SEQUENCE_LENGTH);
        let mut walk = ScaleWalk::new(&seed, Some(3));
        let c_major = [0u8, 2, 4, 5, 7, 9, 11];
        for _ in 0..500 {
            let n = walk.next_note(2.0).unwrap();
            assert!(c_major.contains(&(n.pitch % 12)), "{} out of key", n.pitch);
            assert!(n.duration > 0.0);
            assert!(n.onset_offset >= 0.0);
        }
    }

    #[test]
    fn test_low_temperature_moves_stepwise() {
        let seed = Seed::c_major(SEQUENCE_LENGTH);
        let mut walk = ScaleWalk::new(&seed, Some(11));
        let mut prev = walk.next_note(0.05).unwrap().pitch;
        let mut big_leaps = 0;
        for _ in 0..200 {
            let p = walk.next_note(0.05).unwrap().pitch;
            if p.abs_diff(prev) > 4 {
                big_leaps += 1;
            }
            prev = p;
        }
        assert_eq!(big_leaps, 0);
    }

    #[test]
    fn test_scale_walk_stays_in_register() {
        let seed = Seed::c_major(SEQUENCE_LENGTH);
        let mut walk = ScaleWalk::new(&seed, Some(5));
        for _ in 0..2000 {
            let p = walk.next_note(1.0).unwrap().pitch;
            assert!((24..=108).contains(&p));
        }
    }

    #[test]
    fn test_softmax_temperature_sharpens() {
        let mut rng = StdRng::seed_from_u64(9);
        let logits = [0.0, -3.0];
        let cold = (0..1000).filter(|_| sample_softmax(&logits, 0.1, &mut rng) == 0).count();
        let hot = (0..1000).filter(|_| sample_softmax(&logits, 10.0, &mut rng) == 0).count();
        assert!(cold > 990);
        assert!(hot < 700);
    }

    #[test]
    fn test_tracker_loop_covers_gestures_and_gaps() {
        let mut tracker = SimulatedTracker::new(30.0).unpaced();
        let mut seen = Vec::new();
        let mut gaps = 0;
        for _ in 0..30 * 25 {
            match tracker.next_observation().unwrap() {
                Some(obs) => {
                    let g = obs.resolved_gesture();
                    if !seen.contains(&g) {
                        seen.push(g);
                    }
                    let tip = obs.index_tip();
                    assert!((0.0..=1.0).contains(&tip.x) && (0.0..=1.0).contains(&tip.y));
                }
                None => gaps += 1,
            }
        }
        for g in [Gesture::OpenPalm, Gesture::ClosedFist, Gesture::PeaceSign, Gesture::RockOn] {
            assert!(seen.contains(&g), "never saw {:?}", g);
        }
        assert!(gaps >= 25, "expected a second out of frame, got {} frames", gaps);
    }
}
