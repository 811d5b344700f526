//! Frame clock used to derive per-frame timestamps and delta time.

use std::time::{Duration, Instant};

/// Monotonic clock that stamps frames.
///
/// `begin` is called once at the start of each frame and returns the time
/// elapsed since the previous call, which downstream passes consume as delta
/// time.
#[derive(Debug)]
pub struct FrameClock {
    created: Instant,
    frame_start: Instant,
    previous_delta: Duration,
    frames: u64,
}

impl FrameClock {
    /// Create a clock whose first frame starts now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created: now,
            frame_start: now,
            previous_delta: Duration::ZERO,
            frames: 0,
        }
    }

    /// Stamp the start of a new frame.
    ///
    /// Returns the start instant and the time since the previous frame began.
    pub fn begin(&mut self) -> (Instant, Duration) {
        let now = Instant::now();
        self.previous_delta = now - self.frame_start;
        self.frame_start = now;
        self.frames += 1;
        (now, self.previous_delta)
    }

    /// Start time of the current frame.
    #[inline]
    pub fn frame_start(&self) -> Instant {
        self.frame_start
    }

    /// Duration between the two most recent `begin` calls.
    #[inline]
    pub fn delta(&self) -> Duration {
        self.previous_delta
    }

    /// Number of frames stamped so far.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Total time since the clock was created.
    pub fn uptime(&self) -> Duration {
        self.created.elapsed()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
