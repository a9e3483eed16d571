//! MIDI-learn helper: sweep a single controller so a DAW's mapping mode
//! sees exactly one CC number, with nothing else on the port.
//!
//! [`MappingWizard`] walks through every gesture controller in turn.

use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{MidiEvent, CC_CHORUS, CC_FILTER_CUTOFF, CC_MODULATION, CC_RESONANCE, CC_REVERB};
use log::info;
use std::io::{BufRead, Write};
use std::time::Duration;

/// Value the controller is left at after the sweep.
pub const PARK_VALUE: u8 = 64;

/// One up-and-down pass: 0, 2, .. 126 then 127, 125, .. 1.
pub fn sweep_values() -> Vec<u8> {
    (0..=127u8).step_by(2).chain((1..=127u8).rev().step_by(2)).collect()
}

pub struct CcSweep {
    pub controller: u8,
    pub name: String,
    pub channel: u8,
    /// Seconds per up-and-down pass.
    pub duration: f64,
    pub repetitions: u32,
}

impl CcSweep {
    pub fn new(controller: u8, name: impl Into<String>) -> Self {
        Self {
            controller,
            name: name.into(),
            channel: 0,
            duration: 3.0,
            repetitions: 2,
        }
    }

    /// Run the sweep on the session's output. Stops early on shutdown but
    /// still parks the controller. Returns the number of values sent.
    pub fn run(&self, session: &Session) -> Result<usize> {
        info!(
            "Mapping: {} (CC {}), {} sweep(s) of {:.1}s; only this CC will be sent",
            self.name, self.controller, self.repetitions, self.duration
        );
        let values = sweep_values();
        let pause = Duration::try_from_secs_f64(self.duration.max(0.0) / values.len() as f64)
            .map_err(|e| Error::InvalidConfig(format!("sweep duration {}s: {}", self.duration, e)))?;
        let mut sent = 0;

        'sweeps: for rep in 0..self.repetitions {
            info!("  Sweep {}/{}", rep + 1, self.repetitions);
            for &v in &values {
                session
                    .output
                    .acquire_and_send(MidiEvent::control_change(self.channel, self.controller, v))?;
                sent += 1;
                if !session.shutdown.sleep(pause) {
                    break 'sweeps;
                }
            }
        }

        session
            .output
            .acquire_and_send(MidiEvent::control_change(self.channel, self.controller, PARK_VALUE))?;
        info!("CC {} mapping sweep complete, parked at {}", self.controller, PARK_VALUE);
        Ok(sent + 1)
    }
}

// ─── Wizard ────────────────────────────────────────────────────────────────

/// Controllers in the order the wizard offers them, with a hint for where
/// each one usually goes.
pub const MAPPING_ORDER: [(u8, &str, &str); 5] = [
    (CC_FILTER_CUTOFF, "Filter Cutoff", "Auto Filter: Frequency"),
    (CC_RESONANCE, "Filter Resonance", "Auto Filter: Resonance"),
    (CC_REVERB, "Reverb/Delay Level", "Reverb: Dry/Wet"),
    (CC_CHORUS, "Chorus Amount", "Chorus: Dry/Wet"),
    (CC_MODULATION, "Modulation", "any modulation effect (optional)"),
];

/// Interactive mapping of all controllers, one at a time. Each step can be
/// skipped; after a sweep the user confirms it took, or retries.
///
/// Closed input ends the wizard early.
pub struct MappingWizard<R, W> {
    input: R,
    output: W,
    pub template: CcSweep,
}

impl<R: BufRead, W: Write> MappingWizard<R, W> {
    /// `template` supplies channel, duration and repetitions for every sweep.
    pub fn new(input: R, output: W, template: CcSweep) -> Self {
        Self {
            input,
            output,
            template,
        }
    }

    /// Returns the controllers the user confirmed as mapped.
    pub fn run(&mut self, session: &Session) -> Result<Vec<u8>> {
        let mut mapped = Vec::new();
        writeln!(self.output, "MIDI CC mapping wizard: each controller is sent on its own.")?;

        'steps: for (step, &(cc, name, hint)) in MAPPING_ORDER.iter().enumerate() {
            if session.shutdown.is_triggered() {
                break;
            }
            writeln!(self.output, "\nStep {}/{}: {} (CC {})", step + 1, MAPPING_ORDER.len(), name, cc)?;
            writeln!(self.output, "  Suggestion: map to {}", hint)?;
            let Some(choice) = self.ask("Map this parameter now? (Y/n/skip): ")? else {
                break;
            };
            if matches!(choice.as_str(), "n" | "no" | "s" | "skip") {
                writeln!(self.output, "  Skipped {}", name)?;
                continue;
            }

            loop {
                writeln!(
                    self.output,
                    "  Enable MIDI mapping in your DAW and select the target parameter."
                )?;
                if self.ask("Press ENTER to start the sweep...")?.is_none() {
                    break 'steps;
                }
                let sweep = CcSweep {
                    controller: cc,
                    name: name.to_string(),
                    channel: self.template.channel,
                    duration: self.template.duration,
                    repetitions: self.template.repetitions,
                };
                sweep.run(session)?;
                if session.shutdown.is_triggered() {
                    break 'steps;
                }

                let Some(confirm) = self.ask("Was the mapping successful? (Y/n): ")? else {
                    break 'steps;
                };
                if is_yes(&confirm) {
                    mapped.push(cc);
                    break;
                }
                match self.ask("Retry this mapping? (Y/n): ")? {
                    Some(retry) if is_yes(&retry) => continue,
                    Some(_) => break,
                    None => break 'steps,
                }
            }
        }

        writeln!(
            self.output,
            "\nMapping wizard finished: {}/{} controllers mapped.",
            mapped.len(),
            MAPPING_ORDER.len()
        )?;
        info!("Mapping wizard mapped CCs {:?}", mapped);
        Ok(mapped)
    }

    /// Prompt and read one trimmed, lowercased answer. `None` on closed input.
    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_ascii_lowercase()))
    }
}

fn is_yes(answer: &str) -> bool {
    answer.is_empty() || answer == "y" || answer == "yes"
}
