//! Per-process context handed to every producer thread at startup.

use crate::output::OutputChannel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Process-wide stop flag. Loops check it between sends, never mid-write.
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` in short slices. Returns false if shutdown was
    /// requested before the full duration elapsed.
    pub fn sleep(&self, dur: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + dur;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// The one output channel plus the stop flag.
#[derive(Clone)]
pub struct Session {
    pub output: Arc<OutputChannel>,
    pub shutdown: Shutdown,
}

impl Session {
    pub fn new(output: OutputChannel) -> Self {
        Self {
            output: Arc::new(output),
            shutdown: Shutdown::new(),
        }
    }
}
