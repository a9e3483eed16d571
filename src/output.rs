//! Shared MIDI output: one transport, many producer threads.
//!
//! The melody thread and the gesture thread both write through a single
//! [`OutputChannel`]. Every write happens under its mutex, so a three-byte
//! message is always contiguous on the wire. The raw transport never leaves
//! the wrapper.

use crate::error::{Error, Result};
use crate::types::{MidiEvent, RESET_CCS};
use log::{debug, info, warn};
use midir::{MidiOutput, MidiOutputConnection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// ─── Transports ─────────────────────────────────────────────────────────────

/// Byte sink underneath the output channel.
pub trait MidiTransport: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
    fn name(&self) -> &str;
}

/// A connected midir output port.
pub struct MidirTransport {
    conn: MidiOutputConnection,
    name: String,
}

impl MidiTransport for MidirTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.conn
            .send(bytes)
            .map_err(|e| Error::TransportUnavailable(format!("{}: {}", self.name, e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Swallows everything. Used when no MIDI port could be opened so the
/// rest of the performance (visualization, logging) still runs.
pub struct NullTransport;

impl MidiTransport for NullTransport {
    fn send(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// In-memory transport that records every byte, one byte at a time.
///
/// Writes are deliberately split so that unsynchronized callers would
/// interleave; the output channel must keep each message contiguous.
pub struct MemoryTransport {
    tap: MemoryTap,
}

/// Inspection handle for a [`MemoryTransport`].
#[derive(Clone, Default)]
pub struct MemoryTap {
    bytes: Arc<Mutex<Vec<u8>>>,
    disconnected: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    overlaps: Arc<Mutex<u64>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryTap) {
        let tap = MemoryTap::default();
        (Self { tap: tap.clone() }, tap)
    }
}

impl MidiTransport for MemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.tap.disconnected.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable("memory port disconnected".into()));
        }
        if self.tap.in_flight.swap(true, Ordering::SeqCst) {
            *lock(&self.tap.overlaps) += 1;
        }
        for &b in bytes {
            lock(&self.tap.bytes).push(b);
            std::thread::yield_now();
        }
        self.tap.in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl MemoryTap {
    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.bytes).clone()
    }

    /// Recorded stream split into three-byte messages.
    pub fn messages(&self) -> Vec<[u8; 3]> {
        self.bytes()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }

    /// Number of writes that started while another was still in progress.
    pub fn overlapping_writes(&self) -> u64 {
        *lock(&self.overlaps)
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        lock(&self.bytes).clear();
    }
}

// ─── Port discovery ─────────────────────────────────────────────────────────

/// Name reported to the OS MIDI subsystem, and of the virtual port.
pub const CLIENT_NAME: &str = "RNN Music Generator";

/// How to pick the output port.
#[derive(Debug, Clone, PartialEq)]
pub enum PortChoice {
    /// First port whose name contains this (case-insensitive).
    Named(String),
    /// Index into [`list_output_ports`].
    Index(usize),
    /// Create a virtual port other applications can connect to.
    Virtual,
}

pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out =
        MidiOutput::new(CLIENT_NAME).map_err(|e| Error::MidiPort(format!("init: {}", e)))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|p| {
            midi_out
                .port_name(p)
                .unwrap_or_else(|_| "Unknown".to_string())
        })
        .collect())
}

/// Open a midir connection for the given choice.
pub fn connect(choice: &PortChoice) -> Result<Box<dyn MidiTransport>> {
    let midi_out =
        MidiOutput::new(CLIENT_NAME).map_err(|e| Error::MidiPort(format!("init: {}", e)))?;
    let ports = midi_out.ports();

    let port = match choice {
        PortChoice::Virtual => return connect_virtual(midi_out),
        PortChoice::Index(idx) => ports
            .get(*idx)
            .ok_or_else(|| Error::MidiPort(format!("no port at index {}", idx)))?,
        PortChoice::Named(wanted) => {
            let wanted = wanted.to_lowercase();
            ports
                .iter()
                .find(|p| {
                    midi_out
                        .port_name(p)
                        .map(|n| n.to_lowercase().contains(&wanted))
                        .unwrap_or(false)
                })
                .ok_or_else(|| Error::MidiPort(format!("no port matching '{}'", wanted)))?
        }
    };

    let name = midi_out
        .port_name(port)
        .unwrap_or_else(|_| "Unknown".to_string());
    let conn = midi_out
        .connect(port, "gesture-harmony-out")
        .map_err(|e| Error::MidiPort(format!("connect {}: {}", name, e)))?;
    info!("MIDI: connected to {}", name);
    Ok(Box::new(MidirTransport { conn, name }))
}

#[cfg(unix)]
fn connect_virtual(midi_out: MidiOutput) -> Result<Box<dyn MidiTransport>> {
    use midir::os::unix::VirtualOutput;
    let conn = midi_out
        .create_virtual(CLIENT_NAME)
        .map_err(|e| Error::MidiPort(format!("virtual port: {}", e)))?;
    info!("MIDI: virtual port '{}' created", CLIENT_NAME);
    Ok(Box::new(MidirTransport {
        conn,
        name: CLIENT_NAME.to_string(),
    }))
}

#[cfg(not(unix))]
fn connect_virtual(_midi_out: MidiOutput) -> Result<Box<dyn MidiTransport>> {
    Err(Error::MidiPort(
        "virtual ports are not supported on this platform".into(),
    ))
}

// ─── Output channel ─────────────────────────────────────────────────────────

struct Inner {
    transport: Option<Box<dyn MidiTransport>>,
    /// Sounding notes, one 128-bit set per MIDI channel.
    sounding: [u128; 16],
    /// Channels that have carried controller messages.
    cc_channels: u16,
    sent: u64,
}

impl Inner {
    fn is_sounding(&self, channel: u8, pitch: u8) -> bool {
        self.sounding[(channel & 0x0F) as usize] & (1u128 << (pitch & 0x7F)) != 0
    }

    fn mark(&mut self, channel: u8, pitch: u8, on: bool) {
        let bit = 1u128 << (pitch & 0x7F);
        let set = &mut self.sounding[(channel & 0x0F) as usize];
        if on {
            *set |= bit;
        } else {
            *set &= !bit;
        }
    }

    fn write(&mut self, event: MidiEvent) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::TransportUnavailable("output channel closed".into()))?;
        transport.send(&event.to_bytes())?;
        self.sent += 1;
        Ok(())
    }

    /// Write one event, keeping every note-on paired with a note-off.
    fn dispatch(&mut self, event: MidiEvent) -> Result<()> {
        match event {
            MidiEvent::NoteOn { channel, pitch, velocity } if velocity > 0 => {
                if self.is_sounding(channel, pitch) {
                    debug!("MIDI: retrigger {}, releasing first", pitch);
                    self.write(MidiEvent::note_off(channel, pitch))?;
                    self.mark(channel, pitch, false);
                }
                self.write(event)?;
                self.mark(channel, pitch, true);
            }
            MidiEvent::NoteOn { channel, pitch, .. } | MidiEvent::NoteOff { channel, pitch } => {
                if !self.is_sounding(channel, pitch) {
                    return Ok(());
                }
                self.write(MidiEvent::note_off(channel, pitch))?;
                self.mark(channel, pitch, false);
            }
            MidiEvent::ControlChange { channel, .. } => {
                self.write(event)?;
                self.cc_channels |= 1 << (channel & 0x0F);
            }
        }
        Ok(())
    }
}

/// Mutex-guarded wrapper around the one outbound MIDI connection.
pub struct OutputChannel {
    inner: Mutex<Inner>,
    port_name: String,
}

impl OutputChannel {
    pub fn new(transport: Box<dyn MidiTransport>) -> Self {
        let port_name = transport.name().to_string();
        Self {
            inner: Mutex::new(Inner {
                transport: Some(transport),
                sounding: [0; 16],
                cc_channels: 0,
                sent: 0,
            }),
            port_name,
        }
    }

    /// Block until the transport is free, write `event`, release.
    ///
    /// A note-on for a pitch already sounding on that channel is preceded by
    /// its note-off; a note-off for a silent pitch is dropped.
    pub fn acquire_and_send(&self, event: MidiEvent) -> Result<()> {
        self.lock().dispatch(event)
    }

    /// Write several events under one acquisition, e.g. a melody and
    /// harmony note-on that must start together. Stops at the first failure.
    pub fn acquire_and_send_all(&self, events: &[MidiEvent]) -> Result<()> {
        let mut inner = self.lock();
        for &event in events {
            inner.dispatch(event)?;
        }
        Ok(())
    }

    /// Release every sounding note, zero the controller table on each
    /// channel that used it, then drop the transport. Later sends fail with
    /// `TransportUnavailable`.
    pub fn close(&self) {
        self.shut(true);
    }

    /// Like [`close`](Self::close) but leaves controllers where they are,
    /// e.g. parked after a mapping sweep.
    pub fn close_keeping_controllers(&self) {
        self.shut(false);
    }

    fn shut(&self, reset_controllers: bool) {
        let mut inner = self.lock();
        if inner.transport.is_none() {
            return;
        }
        for channel in 0..16u8 {
            for pitch in 0..128u8 {
                if inner.is_sounding(channel, pitch) {
                    if let Err(e) = inner.write(MidiEvent::note_off(channel, pitch)) {
                        warn!("MIDI: note-off during close failed: {}", e);
                    }
                    inner.mark(channel, pitch, false);
                }
            }
            if reset_controllers && inner.cc_channels & (1 << channel) != 0 {
                for &cc in RESET_CCS.iter() {
                    if let Err(e) = inner.write(MidiEvent::control_change(channel, cc, 0)) {
                        warn!("MIDI: CC reset during close failed: {}", e);
                    }
                }
            }
        }
        inner.transport = None;
        info!("MIDI: port {} closed after {} messages", self.port_name, inner.sent);
    }

    pub fn is_open(&self) -> bool {
        self.lock().transport.is_some()
    }

    pub fn sent_count(&self) -> u64 {
        self.lock().sent
    }

    pub fn is_sounding(&self, channel: u8, pitch: u8) -> bool {
        self.lock().is_sounding(channel, pitch)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A producer that panicked mid-send leaves no partial message behind
        // (sends are whole-slice), so the state is still usable.
        lock(&self.inner)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
