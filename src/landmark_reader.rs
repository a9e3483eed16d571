//! JSONL hand-landmark reader: the pipe from an external vision process.
//!
//! One line per camera frame. A line is either `null` (no hand in frame) or
//! a [`HandObservation`] object:
//!
//! ```text
//! {"landmarks":[{"x":0.51,"y":0.62},...21 points...],"handedness":"Right"}
//! {"landmarks":[...],"handedness":"Left","gesture":"PeaceSign"}
//! null
//! ```
//!
//! Works with any `BufRead`: files, in-memory buffers, stdin. Wrap it in a
//! [`ThreadedTracker`] when the source can stall, so the gesture loop keeps
//! seeing the shutdown flag.

use crate::error::{Error, Result};
use crate::gesture::HandTracker;
use crate::types::HandObservation;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// One parsed line: a frame (hand or no hand) or a parse error message.
pub type ParsedFrame = std::result::Result<Option<HandObservation>, String>;

pub struct LandmarkReader<R: BufRead> {
    reader: R,
    name: String,
    line_buf: String,
    frame_interval: Option<Duration>,
    lines: u64,
    malformed: u64,
}

impl<R: BufRead> LandmarkReader<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            line_buf: String::new(),
            frame_interval: None,
            lines: 0,
            malformed: 0,
        }
    }

    /// Pace playback of a recorded file at `fps` instead of as fast as it
    /// can be read. Live pipes are paced by the producer and need no rate.
    /// Rates too small to give a representable interval are ignored.
    pub fn with_frame_rate(mut self, fps: Option<f32>) -> Self {
        self.frame_interval = fps
            .filter(|f| *f > 0.0)
            .and_then(|f| Duration::try_from_secs_f32(1.0 / f).ok());
        if fps.is_some() && self.frame_interval.is_none() {
            warn!("gesture: ignoring landmark frame rate {:?}", fps);
        }
        self
    }

    /// Parse the next frame. `Ok(None)` at EOF; a malformed line is an inner
    /// `Err`; a failed read is `TrackerUnavailable`.
    pub fn next_frame(&mut self) -> Result<Option<ParsedFrame>> {
        loop {
            self.line_buf.clear();
            let n = self.reader.read_line(&mut self.line_buf).map_err(|e| {
                Error::TrackerUnavailable(format!("{}: read failed: {}", self.name, e))
            })?;
            if n == 0 {
                return Ok(None);
            }
            self.lines += 1;
            let trimmed = self.line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(
                serde_json::from_str::<Option<HandObservation>>(trimmed)
                    .map_err(|e| format!("line {}: {}", self.lines, e)),
            ));
        }
    }

    pub fn malformed_lines(&self) -> u64 {
        self.malformed
    }
}

impl LandmarkReader<Box<dyn BufRead + Send>> {
    /// Open a file, or stdin for `-`.
    pub fn open(path: &Path) -> Result<Self> {
        if path.as_os_str() == "-" {
            info!("gesture: reading landmarks from stdin");
            let stdin: Box<dyn BufRead + Send> = Box::new(BufReader::new(io::stdin()));
            return Ok(Self::new(stdin, "stdin"));
        }
        let file = File::open(path).map_err(|e| {
            Error::TrackerUnavailable(format!("open {}: {}", path.display(), e))
        })?;
        info!("gesture: reading landmarks from {}", path.display());
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(file));
        Ok(Self::new(reader, path.display().to_string()))
    }
}

impl<R: BufRead + Send> HandTracker for LandmarkReader<R> {
    fn next_observation(&mut self) -> Result<Option<HandObservation>> {
        if let Some(interval) = self.frame_interval {
            thread::sleep(interval);
        }
        match self.next_frame()? {
            None => Err(Error::TrackerUnavailable(format!(
                "{}: landmark stream ended",
                self.name
            ))),
            Some(Ok(obs)) => Ok(obs),
            Some(Err(e)) => {
                // One bad line is a dropped frame, not a dead tracker
                self.malformed += 1;
                warn!("gesture: skipping malformed landmark frame ({})", e);
                Ok(None)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs a tracker on its own thread and hands frames over a channel.
///
/// `next_observation` waits at most `poll` for a frame and reports "no
/// hand" on timeout, so the caller returns to its loop (and its shutdown
/// check) even while the source is blocked in a read.
pub struct ThreadedTracker {
    rx: Receiver<Result<Option<HandObservation>>>,
    name: String,
    poll: Duration,
}

impl ThreadedTracker {
    pub const DEFAULT_POLL: Duration = Duration::from_millis(100);

    pub fn spawn<T: HandTracker + 'static>(mut inner: T) -> Result<Self> {
        let name = inner.name().to_string();
        let (tx, rx) = bounded(64);
        thread::Builder::new()
            .name("landmarks".into())
            .spawn(move || loop {
                let frame = inner.next_observation();
                let failed = frame.is_err();
                if tx.send(frame).is_err() || failed {
                    debug!("gesture: landmark reader thread exiting");
                    break;
                }
            })?;
        Ok(Self {
            rx,
            name,
            poll: Self::DEFAULT_POLL,
        })
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}

impl HandTracker for ThreadedTracker {
    fn next_observation(&mut self) -> Result<Option<HandObservation>> {
        match self.rx.recv_timeout(self.poll) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::TrackerUnavailable(format!(
                "{}: reader thread stopped",
                self.name
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::synthetic_hand;
    use crate::types::{Gesture, Handedness};
    use std::io::{Cursor, Read};
    use std::time::Instant;

    /// A reader whose every read fails.
    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    impl BufRead for Broken {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }

        fn consume(&mut self, _amt: usize) {}
    }

    /// A tracker that never produces a frame until released.
    struct Stalled {
        release: Receiver<()>,
    }

    impl HandTracker for Stalled {
        fn next_observation(&mut self) -> Result<Option<HandObservation>> {
            let _ = self.release.recv();
            Err(Error::TrackerUnavailable("released".into()))
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    fn frame_line(g: Gesture) -> String {
        serde_json::to_string(&synthetic_hand(g, (0.4, 0.6), 0.1, Handedness::Left)).unwrap()
    }

    #[test]
    fn test_reads_hands_and_gaps() {
        let data = format!("{}\nnull\n\n{}\n", frame_line(Gesture::OpenPalm), frame_line(Gesture::RockOn));
        let mut r = LandmarkReader::new(Cursor::new(data), "test");

        let first = r.next_observation().unwrap().unwrap();
        assert_eq!(first.resolved_gesture(), Gesture::OpenPalm);
        assert_eq!(first.handedness, Handedness::Left);
        assert!(r.next_observation().unwrap().is_none());
        let third = r.next_observation().unwrap().unwrap();
        assert_eq!(third.resolved_gesture(), Gesture::RockOn);
    }

    #[test]
    fn test_eof_is_tracker_unavailable() {
        let mut r = LandmarkReader::new(Cursor::new(String::new()), "empty");
        assert!(matches!(r.next_observation(), Err(Error::TrackerUnavailable(_))));
    }

    #[test]
    fn test_malformed_line_is_dropped_frame() {
        let data = format!("not json\n{}\n", frame_line(Gesture::ClosedFist));
        let mut r = LandmarkReader::new(Cursor::new(data), "test");
        assert!(r.next_observation().unwrap().is_none());
        assert_eq!(r.malformed_lines(), 1);
        assert!(r.next_observation().unwrap().is_some());
    }

    #[test]
    fn test_wrong_landmark_count_rejected() {
        let data = r#"{"landmarks":[{"x":0.1,"y":0.2}],"handedness":"Right"}"#.to_string() + "\n";
        let mut r = LandmarkReader::new(Cursor::new(data), "test");
        assert!(r.next_frame().unwrap().unwrap().is_err());
    }

    #[test]
    fn test_read_error_is_tracker_unavailable() {
        let mut r = LandmarkReader::new(Broken, "broken pipe");
        assert!(matches!(r.next_observation(), Err(Error::TrackerUnavailable(_))));
        assert_eq!(r.malformed_lines(), 0);
    }

    #[test]
    fn test_unrepresentable_frame_rate_ignored() {
        let r = LandmarkReader::new(Cursor::new(String::new()), "test")
            .with_frame_rate(Some(f32::MIN_POSITIVE / 4.0));
        assert!(r.frame_interval.is_none());
        let r = LandmarkReader::new(Cursor::new(String::new()), "test").with_frame_rate(Some(50.0));
        let interval = r.frame_interval.unwrap();
        assert!(interval.abs_diff(Duration::from_millis(20)) < Duration::from_micros(1));
    }

    #[test]
    fn test_threaded_tracker_passes_frames_then_fails() {
        let data = format!("{}\nnull\n", frame_line(Gesture::PeaceSign));
        let reader = LandmarkReader::new(Cursor::new(data), "recorded");
        let mut t = ThreadedTracker::spawn(reader).unwrap().with_poll(Duration::from_secs(5));
        assert_eq!(
            t.next_observation().unwrap().unwrap().resolved_gesture(),
            Gesture::PeaceSign
        );
        assert!(t.next_observation().unwrap().is_none());
        assert!(matches!(t.next_observation(), Err(Error::TrackerUnavailable(_))));
        assert!(matches!(t.next_observation(), Err(Error::TrackerUnavailable(_))));
    }

    #[test]
    fn test_threaded_tracker_does_not_block_on_stalled_source() {
        let (release_tx, release_rx) = bounded(1);
        let mut t = ThreadedTracker::spawn(Stalled { release: release_rx })
            .unwrap()
            .with_poll(Duration::from_millis(20));
        let start = Instant::now();
        assert!(t.next_observation().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
        drop(release_tx);
    }

    #[test]
    fn test_open_missing_file() {
        let result = LandmarkReader::open(Path::new("/nonexistent/landmarks.jsonl"));
        assert!(matches!(result, Err(Error::TrackerUnavailable(_))));
    }
}
