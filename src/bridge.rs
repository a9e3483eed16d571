//! Hand position → MIDI CC.
//!
//! Every frame updates the smoothing windows and the current controller
//! values. Emission happens on a fixed tick (20 Hz by default) and carries
//! whatever is current at that moment; frames in between only feed the
//! windows. A frame without a hand changes nothing, so the last values are
//! held instead of snapping to zero.

use crate::gesture::HandTracker;
use crate::session::Session;
use crate::types::*;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: usize = 5;
pub const DEFAULT_RATE_HZ: u32 = 20;
/// Changes smaller than this are not re-sent.
pub const CHANGE_THRESHOLD: u8 = 2;
/// Thumb–index distance mapped onto the full resonance range.
pub const PINCH_RANGE: f32 = 0.3;

/// Fixed-length moving average.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    samples: VecDeque<f32>,
    len: usize,
}

impl SmoothingWindow {
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            samples: VecDeque::with_capacity(len),
            len,
        }
    }

    /// Add a sample and return the new mean.
    pub fn push(&mut self, value: f32) -> f32 {
        if self.samples.len() == self.len {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }
}

/// Scale `value` from [min, max] onto 0–127, clamped, truncating.
pub fn normalize_to_midi(value: f32, min: f32, max: f32) -> u8 {
    let n = ((value - min) / (max - min)).clamp(0.0, 1.0);
    (n * 127.0) as u8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub channel: u8,
    pub rate_hz: u32,
    pub window: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            rate_hz: DEFAULT_RATE_HZ,
            window: DEFAULT_WINDOW,
        }
    }
}

pub struct ControllerBridge {
    channel: u8,
    interval: Duration,
    x: SmoothingWindow,
    y: SmoothingWindow,
    pinch: SmoothingWindow,
    current: ControllerState,
    last_emitted: ControllerState,
    last_tick: Option<Instant>,
    last_gesture: Option<Gesture>,
}

impl ControllerBridge {
    pub fn new(config: &BridgeConfig) -> Self {
        let rate = config.rate_hz.max(1);
        Self {
            channel: config.channel,
            interval: Duration::from_micros(1_000_000 / rate as u64),
            x: SmoothingWindow::new(config.window),
            y: SmoothingWindow::new(config.window),
            pinch: SmoothingWindow::new(config.window),
            current: ControllerState::new(),
            last_emitted: ControllerState::new(),
            last_tick: None,
            last_gesture: None,
        }
    }

    /// Fold one tracker frame into the current controller values.
    pub fn observe(&mut self, obs: Option<&HandObservation>) {
        let Some(obs) = obs else {
            return;
        };

        let tip = obs.index_tip();
        let x = self.x.push(tip.x);
        let y = self.y.push(tip.y);
        let pinch = self.pinch.push(obs.pinch_distance());

        // Left = dark, right = bright
        self.current.set(CC_FILTER_CUTOFF, normalize_to_midi(x, 0.0, 1.0));
        // Hand up = more effect
        self.current.set(CC_REVERB, normalize_to_midi(1.0 - y, 0.0, 1.0));
        self.current.set(CC_RESONANCE, normalize_to_midi(pinch, 0.0, PINCH_RANGE));

        let gesture = obs.resolved_gesture();
        match gesture {
            Gesture::OpenPalm => self.current.set(CC_CHORUS, 127),
            Gesture::ClosedFist => {
                self.current.set(CC_CHORUS, 0);
                self.current.set(CC_MODULATION, 0);
            }
            Gesture::PeaceSign => self.current.set(CC_MODULATION, 64),
            Gesture::RockOn => self.current.set(CC_MODULATION, 127),
            _ => {}
        }
        if self.last_gesture != Some(gesture) {
            debug!("gesture: {}", gesture);
            self.last_gesture = Some(gesture);
        }
    }

    /// If a tick is due at `now`, return the controller messages for it
    /// (possibly none when nothing moved enough). `None` between ticks.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<MidiEvent>> {
        if let Some(last) = self.last_tick {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_tick = Some(now);

        let mut events = Vec::new();
        for (cc, value) in self.current.iter() {
            let changed = match self.last_emitted.get(cc) {
                Some(prev) => prev.abs_diff(value) >= CHANGE_THRESHOLD,
                None => true,
            };
            if changed {
                events.push(MidiEvent::control_change(self.channel, cc, value));
            }
        }
        for e in &events {
            if let MidiEvent::ControlChange { controller, value, .. } = *e {
                self.last_emitted.set(controller, value);
            }
        }
        Some(events)
    }

    /// `observe` then `poll`; returns an empty list between ticks.
    pub fn on_frame(&mut self, obs: Option<&HandObservation>, now: Instant) -> Vec<MidiEvent> {
        self.observe(obs);
        self.poll(now).unwrap_or_default()
    }

    pub fn current(&self) -> &ControllerState {
        &self.current
    }

    pub fn last_emitted(&self) -> &ControllerState {
        &self.last_emitted
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// The gesture thread: tracker → bridge → shared output.
pub struct GestureLoop {
    tracker: Box<dyn HandTracker>,
    bridge: ControllerBridge,
    session: Session,
}

impl GestureLoop {
    pub fn new(tracker: Box<dyn HandTracker>, config: &BridgeConfig, session: Session) -> Self {
        Self {
            tracker,
            bridge: ControllerBridge::new(config),
            session,
        }
    }

    /// Run until shutdown or tracker failure. Returns the number of
    /// controller messages written.
    pub fn run(mut self) -> u64 {
        info!(
            "gesture: tracking via {} (CC every {:?})",
            self.tracker.name(),
            self.bridge.interval()
        );
        let mut frames: u64 = 0;
        let mut sent: u64 = 0;

        while !self.session.shutdown.is_triggered() {
            let obs = match self.tracker.next_observation() {
                Ok(obs) => obs,
                Err(e) => {
                    warn!("gesture: {}; gesture control disabled, music continues", e);
                    break;
                }
            };
            frames += 1;

            for event in self.bridge.on_frame(obs.as_ref(), Instant::now()) {
                match self.session.output.acquire_and_send(event) {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("gesture: dropped {}: {}", event, e),
                }
            }
        }

        info!("gesture: stopped after {} frames, {} CC messages", frames, sent);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::synthetic_hand;

    fn hand(g: Gesture, x: f32, y: f32) -> HandObservation {
        synthetic_hand(g, (x, y), 0.15, Handedness::Right)
    }

    #[test]
    fn test_window_mean_and_eviction() {
        let mut w = SmoothingWindow::new(3);
        assert_eq!(w.push(3.0), 3.0);
        assert_eq!(w.push(6.0), 4.5);
        assert_eq!(w.push(9.0), 6.0);
        // 3.0 drops out
        assert_eq!(w.push(12.0), 9.0);
        assert_eq!(w.push(12.0), 11.0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_to_midi(0.0, 0.0, 1.0), 0);
        assert_eq!(normalize_to_midi(1.0, 0.0, 1.0), 127);
        assert_eq!(normalize_to_midi(0.5, 0.0, 1.0), 63);
        assert_eq!(normalize_to_midi(-3.0, 0.0, 1.0), 0);
        assert_eq!(normalize_to_midi(0.6, 0.0, PINCH_RANGE), 127);
    }

    #[test]
    fn test_position_mapping() {
        let mut b = ControllerBridge::new(&BridgeConfig::default());
        let events = b.on_frame(Some(&hand(Gesture::Pointing, 1.0, 0.0)), Instant::now());
        let state = b.last_emitted();
        assert_eq!(state.get(CC_FILTER_CUTOFF), Some(127));
        assert_eq!(state.get(CC_REVERB), Some(127));
        // 0.15 / 0.3 of the range
        assert_eq!(state.get(CC_RESONANCE), Some(63));
        assert!(events.contains(&MidiEvent::control_change(0, CC_FILTER_CUTOFF, 127)));
    }

    #[test]
    fn test_gesture_overrides() {
        let t = Instant::now();
        let mut b = ControllerBridge::new(&BridgeConfig::default());
        b.observe(Some(&hand(Gesture::OpenPalm, 0.5, 0.5)));
        assert_eq!(b.current().get(CC_CHORUS), Some(127));
        b.observe(Some(&hand(Gesture::RockOn, 0.5, 0.5)));
        assert_eq!(b.current().get(CC_MODULATION), Some(127));
        b.observe(Some(&hand(Gesture::PeaceSign, 0.5, 0.5)));
        assert_eq!(b.current().get(CC_MODULATION), Some(64));
        b.observe(Some(&hand(Gesture::ClosedFist, 0.5, 0.5)));
        assert_eq!(b.current().get(CC_CHORUS), Some(0));
        assert_eq!(b.current().get(CC_MODULATION), Some(0));
        let events = b.poll(t).unwrap();
        assert!(events.contains(&MidiEvent::control_change(0, CC_CHORUS, 0)));
    }

    #[test]
    fn test_one_emission_per_tick() {
        let t0 = Instant::now();
        let mut b = ControllerBridge::new(&BridgeConfig::default());
        let mut batches = 0;
        // 100 frames inside one 50 ms window, hand sweeping across
        for i in 0..100u32 {
            let x = i as f32 / 100.0;
            b.observe(Some(&hand(Gesture::Pointing, x, 0.5)));
            if b.poll(t0 + Duration::from_micros(i as u64 * 400)).is_some() {
                batches += 1;
            }
        }
        assert_eq!(batches, 1);

        // Next window opens at 50 ms
        b.observe(Some(&hand(Gesture::Pointing, 0.9, 0.5)));
        assert!(b.poll(t0 + Duration::from_millis(50)).is_some());
    }

    #[test]
    fn test_tick_carries_latest_smoothed_value() {
        let t0 = Instant::now();
        let mut b = ControllerBridge::new(&BridgeConfig::default());
        b.on_frame(Some(&hand(Gesture::Pointing, 0.0, 0.5)), t0);
        for i in 1..=10u64 {
            b.on_frame(Some(&hand(Gesture::Pointing, 1.0, 0.5)), t0 + Duration::from_millis(i));
        }
        // Window of 5 is now all 1.0
        let events = b.poll(t0 + Duration::from_millis(60)).unwrap();
        assert!(events.contains(&MidiEvent::control_change(0, CC_FILTER_CUTOFF, 127)));
    }

    #[test]
    fn test_no_hand_holds_last_values() {
        let t0 = Instant::now();
        let mut b = ControllerBridge::new(&BridgeConfig::default());
        b.on_frame(Some(&hand(Gesture::OpenPalm, 0.8, 0.2)), t0);
        let before = b.last_emitted().clone();
        assert!(!before.is_empty());

        for i in 1..=40u64 {
            let events = b.on_frame(None, t0 + Duration::from_millis(i * 25));
            assert!(events.is_empty());
        }
        assert_eq!(b.last_emitted(), &before);
        assert_eq!(b.current(), &before);
    }

    #[test]
    fn test_small_changes_suppressed() {
        let t0 = Instant::now();
        let mut b = ControllerBridge::new(&BridgeConfig { window: 1, ..Default::default() });
        b.on_frame(Some(&hand(Gesture::Pointing, 0.5, 0.5)), t0);
        // 0.5 → 63, 0.505 → 64: a one-step change is not re-sent
        let events = b.on_frame(Some(&hand(Gesture::Pointing, 0.505, 0.5)), t0 + Duration::from_millis(60));
        assert!(!events.iter().any(|e| matches!(e, MidiEvent::ControlChange { controller: CC_FILTER_CUTOFF, .. })));
        let events = b.on_frame(Some(&hand(Gesture::Pointing, 0.6, 0.5)), t0 + Duration::from_millis(120));
        assert!(events.contains(&MidiEvent::control_change(0, CC_FILTER_CUTOFF, 76)));
    }
}
