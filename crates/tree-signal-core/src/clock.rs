//! Time source abstraction
//!
//! Decay is a function of wall-clock time, so everything that samples "now"
//! goes through [`Clock`]. Tests and the simulator drive a [`ManualClock`].

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

/// Source of the current instant
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Settable clock for deterministic runs
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Start at `start`
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = at;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Move forward by fractional seconds
    pub fn advance_secs(&self, secs: f64) {
        self.advance(seconds(secs));
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Fractional seconds as a chrono duration, millisecond resolution
///
/// Saturates at the representable range instead of panicking.
#[must_use]
pub fn seconds(secs: f64) -> Duration {
    #[allow(clippy::cast_possible_truncation)]
    let ms = (secs * 1000.0).round() as i64;
    Duration::try_milliseconds(ms).unwrap_or(if ms < 0 { Duration::MIN } else { Duration::MAX })
}

/// Signed seconds between two instants
#[must_use]
pub fn elapsed_secs(from: Timestamp, to: Timestamp) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let ms = (to - from).num_milliseconds() as f64;
    ms / 1000.0
}
