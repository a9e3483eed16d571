use crate::types::VizNote;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

/// Lowest and highest pitch drawn on the roll.
const ROLL_LOW: u8 = 36;
const ROLL_HIGH: u8 = 96;

/// Scrolling piano roll on stdout: one line per melody note.
pub struct ConsoleDisplay {
    rx: Receiver<VizNote>,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<VizNote>) -> Self {
        Self { rx }
    }

    pub fn run(&self) {
        let mut stdout = io::stdout();
        println!("{:>5}  {:<4} {:>5}  {}", "#", "note", "pitch", roll_header());
        for note in self.rx.iter() {
            println!("{}", format_line(&note));
            let _ = stdout.flush();
        }
    }
}

pub fn format_line(note: &VizNote) -> String {
    format!(
        "{:>5}  {:<4} {:>5}  {}  {:.2}s {}",
        note.index,
        note.note_name,
        note.pitch,
        make_roll(note.pitch),
        note.duration,
        make_bar(note.velocity as f32 / 127.0, 8),
    )
}

/// One cell per semitone, C columns marked; pitches off the roll pin to
/// the edge as an arrow.
fn make_roll(pitch: u8) -> String {
    (ROLL_LOW..=ROLL_HIGH)
        .map(|p| {
            if p == pitch {
                '█'
            } else if p == ROLL_LOW && pitch < ROLL_LOW {
                '◀'
            } else if p == ROLL_HIGH && pitch > ROLL_HIGH {
                '▶'
            } else if p % 12 == 0 {
                '│'
            } else {
                '·'
            }
        })
        .collect()
}

fn roll_header() -> String {
    let mut header: Vec<char> = vec![' '; (ROLL_HIGH - ROLL_LOW + 1) as usize];
    for p in (ROLL_LOW..=ROLL_HIGH).filter(|p| p % 12 == 0) {
        let label = format!("C{}", p as i32 / 12 - 1);
        for (i, ch) in label.chars().enumerate() {
            if let Some(slot) = header.get_mut((p - ROLL_LOW) as usize + i) {
                *slot = ch;
            }
        }
    }
    header.into_iter().collect()
}

fn make_bar(val: f32, width: usize) -> String {
    let filled = (val.clamp(0.0, 1.0) * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}
