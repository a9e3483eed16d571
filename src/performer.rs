use crate::config::Config;
use crate::harmony::HarmonyGenerator;
use crate::melody::MelodySource;
use crate::session::Session;
use crate::types::*;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, trace, warn};
use std::time::Duration;

/// Timing and channel settings for the melody thread.
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub temperature: f64,
    pub velocity: u8,
    pub num_notes: Option<u64>,
    pub min_duration: f64,
    pub max_duration: f64,
    pub speed: f64,
    pub melody_channel: u8,
    pub harmony_channel: u8,
}

impl From<&Config> for PerformanceConfig {
    fn from(c: &Config) -> Self {
        let g = &c.generation;
        Self {
            temperature: g.temperature,
            velocity: g.velocity,
            num_notes: g.num_notes,
            min_duration: g.min_duration,
            max_duration: g.max_duration,
            speed: g.speed,
            melody_channel: g.channel,
            harmony_channel: c.harmony_channel(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerformanceStats {
    pub melody_notes: u64,
    pub harmony_notes: u64,
    /// Sends that failed because the port was gone.
    pub failed_sends: u64,
    /// Notes whose shaped duration was not a playable hold time.
    pub dropped_notes: u64,
    pub interrupted: bool,
}

/// The melody thread: pulls notes from the source, derives harmony, plays
/// both through the shared output and feeds the visualization listeners.
///
/// Notes play back to back: each note's hold time is its duration, and the
/// reported step is informational.
pub struct Performer {
    source: Box<dyn MelodySource>,
    harmony: Option<HarmonyGenerator>,
    session: Session,
    note_txs: Vec<Sender<VizNote>>,
    config: PerformanceConfig,
}

impl Performer {
    pub fn new(source: Box<dyn MelodySource>, config: PerformanceConfig, session: Session) -> Self {
        Self {
            source,
            harmony: None,
            session,
            note_txs: Vec::new(),
            config,
        }
    }

    /// Enable the second voice.
    pub fn with_harmony(mut self, harmony: HarmonyGenerator) -> Self {
        self.harmony = Some(harmony);
        self
    }

    /// Add a listener for per-note events. Sends never block the melody.
    pub fn with_listener(mut self, tx: Sender<VizNote>) -> Self {
        self.note_txs.push(tx);
        self
    }

    /// Clamp and scale a source note into what will actually be played.
    pub fn shape(&self, raw: &Note) -> Note {
        let c = &self.config;
        let duration = raw.duration.max(c.min_duration).min(c.max_duration) * c.speed;
        Note::new(raw.pitch, raw.onset_offset * c.speed, duration, c.velocity)
    }

    pub fn run(&mut self) -> PerformanceStats {
        info!(
            "Performing from {} (temperature {}, speed {}x, harmony {})",
            self.source.name(),
            self.config.temperature,
            self.config.speed,
            match &self.harmony {
                Some(h) => h.profile().style().to_string(),
                None => "off".into(),
            }
        );
        let mut stats = PerformanceStats::default();

        loop {
            if self
                .config
                .num_notes
                .is_some_and(|n| stats.melody_notes + stats.dropped_notes >= n)
            {
                break;
            }
            if self.session.shutdown.is_triggered() {
                stats.interrupted = true;
                break;
            }
            let raw = match self.source.next_note(self.config.temperature) {
                Some(n) => n,
                None => {
                    info!("Melody source exhausted");
                    break;
                }
            };

            let melody = self.shape(&raw);
            let hold = match Duration::try_from_secs_f64(melody.duration) {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        "Dropping {} ({}): duration {}s: {}",
                        melody.name(),
                        melody.pitch,
                        melody.duration,
                        e
                    );
                    stats.dropped_notes += 1;
                    continue;
                }
            };
            let index = stats.melody_notes + 1;
            info!(
                "Note {}: {} ({}) | step: {:.3}s | duration: {:.3}s",
                index,
                melody.name(),
                melody.pitch,
                melody.onset_offset,
                melody.duration
            );
            self.publish(VizNote::from_note(&melody, index));

            let harmony = self.harmony.as_mut().map(|h| h.next(&melody));
            if !self.play(&melody, hold, harmony.as_ref(), &mut stats) {
                stats.interrupted = true;
            }
            stats.melody_notes += 1;
            if harmony.is_some() {
                stats.harmony_notes += 1;
            }
            if stats.interrupted {
                break;
            }
        }

        info!(
            "Performance finished: {} melody notes, {} harmony notes, {} dropped{}",
            stats.melody_notes,
            stats.harmony_notes,
            stats.dropped_notes,
            if stats.interrupted { " (interrupted)" } else { "" }
        );
        stats
    }

    /// Sound one melody note (and its harmony) for `hold`. Note-offs go out
    /// even when shutdown cuts the hold short. Returns false if it did.
    fn play(
        &self,
        melody: &Note,
        hold: Duration,
        harmony: Option<&Note>,
        stats: &mut PerformanceStats,
    ) -> bool {
        let mc = self.config.melody_channel;
        let hc = self.config.harmony_channel;

        let mut ons = vec![MidiEvent::note_on(mc, melody.pitch, melody.velocity)];
        if let Some(h) = harmony {
            debug!("harmony: {} under {}", h.name(), melody.name());
            ons.push(MidiEvent::note_on(hc, h.pitch, h.velocity));
        }
        self.send_all(&ons, stats);

        let mut completed = true;
        let mut held = Duration::ZERO;
        if let Some(h) = harmony {
            held = Duration::try_from_secs_f64(h.duration).map_or(hold, |d| d.min(hold));
            completed = self.session.shutdown.sleep(held);
            self.send_all(&[MidiEvent::note_off(hc, h.pitch)], stats);
        }
        if completed {
            completed = self.session.shutdown.sleep(hold.saturating_sub(held));
        }
        self.send_all(&[MidiEvent::note_off(mc, melody.pitch)], stats);
        completed
    }

    fn send_all(&self, events: &[MidiEvent], stats: &mut PerformanceStats) {
        if let Err(e) = self.session.output.acquire_and_send_all(events) {
            stats.failed_sends += 1;
            warn!("MIDI: skipped {} event(s): {}", events.len(), e);
        }
    }

    fn publish(&mut self, note: VizNote) {
        self.note_txs.retain(|tx| match tx.try_send(note.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("viz: listener busy, dropped note {}", note.index);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("viz: listener gone");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmony::{HarmonyProfile, HarmonyStyle};
    use crate::melody::{ScriptedMelody, Seed};
    use crate::output::{MemoryTransport, OutputChannel};
    use crossbeam_channel::bounded;

    fn fast_config() -> PerformanceConfig {
        PerformanceConfig {
            speed: 0.01,
            ..Default::default()
        }
    }

    fn session() -> (Session, crate::output::MemoryTap) {
        let (transport, tap) = MemoryTransport::new();
        (Session::new(OutputChannel::new(Box::new(transport))), tap)
    }

    #[test]
    fn test_shape_clamps_then_scales() {
        let (s, _tap) = session();
        let p = Performer::new(
            Box::new(ScriptedMelody::new(vec![])),
            PerformanceConfig {
                speed: 2.0,
                velocity: 90,
                ..Default::default()
            },
            s,
        );
        let shaped = p.shape(&Note::new(60, 0.5, 5.0, 10));
        assert_eq!(shaped.duration, 4.0);
        assert_eq!(shaped.onset_offset, 1.0);
        assert_eq!(shaped.velocity, 90);
        let short = p.shape(&Note::new(60, 0.5, 0.01, 10));
        assert!((short.duration - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_melody_only_pairs_every_note() {
        let (s, tap) = session();
        let mut p = Performer::new(Box::new(ScriptedMelody::new(Seed::c_major(4).notes)), fast_config(), s.clone());
        let stats = p.run();
        assert_eq!(stats.melody_notes, 4);
        assert_eq!(stats.harmony_notes, 0);
        let msgs = tap.messages();
        assert_eq!(msgs.len(), 8);
        assert_eq!(msgs[0], [0x90, 60, 80]);
        assert_eq!(msgs[1], [0x80, 60, 0]);
        assert!(!s.output.is_sounding(0, 60));
    }

    #[test]
    fn test_harmony_ends_before_melody() {
        let (s, tap) = session();
        let generator = HarmonyGenerator::new(HarmonyProfile::for_style(HarmonyStyle::Classical), 8, Some(1));
        let mut p = Performer::new(Box::new(ScriptedMelody::new(vec![Note::new(64, 0.5, 0.4, 80)])), fast_config(), s)
            .with_harmony(generator);
        let stats = p.run();
        assert_eq!(stats.harmony_notes, 1);

        let msgs = tap.messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], [0x90, 64, 80]);
        assert_eq!(msgs[1][0], 0x90);
        assert_eq!(msgs[1][2], 64);
        let harmony_pitch = msgs[1][1];
        assert_eq!(msgs[2], [0x80, harmony_pitch, 0]);
        assert_eq!(msgs[3], [0x80, 64, 0]);
    }

    #[test]
    fn test_num_notes_limit() {
        let (s, _tap) = session();
        let mut p = Performer::new(
            Box::new(ScriptedMelody::new(Seed::c_major(10).notes)),
            PerformanceConfig {
                num_notes: Some(3),
                ..fast_config()
            },
            s,
        );
        assert_eq!(p.run().melody_notes, 3);
    }

    #[test]
    fn test_shutdown_still_releases_note() {
        let (s, tap) = session();
        let mut p = Performer::new(
            Box::new(ScriptedMelody::new(vec![Note::new(60, 0.5, 2.0, 80)])),
            PerformanceConfig::default(),
            s.clone(),
        );
        let stop = s.shutdown.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.trigger();
        });
        let stats = p.run();
        t.join().unwrap();
        assert!(stats.interrupted);
        assert_eq!(tap.messages(), vec![[0x90, 60, 80], [0x80, 60, 0]]);
    }

    #[test]
    fn test_listeners_get_notes_and_slow_ones_drop() {
        let (s, _tap) = session();
        let (tx, rx) = bounded(16);
        let (slow_tx, slow_rx) = bounded(1);
        let (gone_tx, gone_rx) = bounded(1);
        drop(gone_rx);
        let mut p = Performer::new(Box::new(ScriptedMelody::new(Seed::c_major(3).notes)), fast_config(), s)
            .with_listener(tx)
            .with_listener(slow_tx)
            .with_listener(gone_tx);
        p.run();

        let notes: Vec<VizNote> = rx.try_iter().collect();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0].index, 1);
        assert_eq!(notes[2].note_name, "E4");
        assert_eq!(notes[0].kind, "note");
        assert_eq!(slow_rx.try_iter().count(), 1);
    }

    #[test]
    fn test_unplayable_duration_is_dropped() {
        let (s, tap) = session();
        let mut p = Performer::new(
            Box::new(ScriptedMelody::new(Seed::c_major(3).notes)),
            PerformanceConfig {
                speed: f64::INFINITY,
                ..Default::default()
            },
            s,
        )
        .with_harmony(HarmonyGenerator::new(
            HarmonyProfile::for_style(HarmonyStyle::Classical),
            8,
            Some(1),
        ));
        let stats = p.run();
        assert_eq!(stats.dropped_notes, 3);
        assert_eq!(stats.melody_notes, 0);
        assert!(tap.messages().is_empty());
    }

    #[test]
    fn test_dropped_notes_count_toward_limit() {
        let (s, _tap) = session();
        let mut p = Performer::new(
            Box::new(ScriptedMelody::new(Seed::c_major(10).notes)),
            PerformanceConfig {
                speed: f64::INFINITY,
                num_notes: Some(4),
                ..Default::default()
            },
            s,
        );
        let stats = p.run();
        assert_eq!(stats.dropped_notes, 4);
    }

    #[test]
    fn test_closed_port_is_skipped_not_fatal() {
        let (s, tap) = session();
        tap.disconnect();
        let mut p = Performer::new(Box::new(ScriptedMelody::new(Seed::c_major(2).notes)), fast_config(), s);
        let stats = p.run();
        assert_eq!(stats.melody_notes, 2);
        // Note-offs for notes that never sounded are not written at all
        assert_eq!(stats.failed_sends, 2);
        assert!(tap.bytes().is_empty());
    }
}
