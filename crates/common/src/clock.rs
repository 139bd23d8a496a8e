//! Presentation-time and wall-clock utilities.
//!
//! Rendered frames are stamped by a [`FrameClock`], a monotonic counter that
//! can only move forward. Presentation times are kept as rationals
//! (`value / timescale`) so frame `i` at `fps` lands exactly on `i / fps`.

use chrono::{DateTime, SecondsFormat, Utc};

/// A rational presentation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameTime {
    /// Tick count.
    pub value: u64,
    /// Ticks per second.
    pub timescale: u32,
}

impl FrameTime {
    pub fn new(value: u64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    /// Time in seconds.
    pub fn as_secs(&self) -> f64 {
        self.value as f64 / self.timescale.max(1) as f64
    }

    /// Time in nanoseconds, rounded down.
    pub fn as_nanos(&self) -> u64 {
        (self.value as u128 * 1_000_000_000 / self.timescale.max(1) as u128) as u64
    }
}

/// Monotonic frame counter for a fixed frame rate.
///
/// Each call to [`FrameClock::tick`] hands out the next presentation time,
/// so timestamps are strictly increasing and contiguous by construction.
#[derive(Debug)]
pub struct FrameClock {
    fps: u32,
    next_frame: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            next_frame: 0,
        }
    }

    /// Take the presentation time for the next frame and advance.
    pub fn tick(&mut self) -> FrameTime {
        let time = FrameTime::new(self.next_frame, self.fps);
        self.next_frame += 1;
        time
    }

    /// Presentation time the next tick will return.
    pub fn peek(&self) -> FrameTime {
        FrameTime::new(self.next_frame, self.fps)
    }

    /// Frames stamped so far.
    pub fn frames_emitted(&self) -> u64 {
        self.next_frame
    }

    /// Duration covered by the frames stamped so far.
    pub fn duration_secs(&self) -> f64 {
        self.next_frame as f64 / self.fps as f64
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

/// ISO 8601 UTC timestamp with millisecond precision, used in output names.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
