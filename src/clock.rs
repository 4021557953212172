//! Wall-clock abstraction used when bucket resets are computed from absolute timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix time, so absolute reset headers can be tested deterministically.
pub trait WallClock: Send + Sync + std::fmt::Debug {
    /// Seconds since the Unix epoch, with sub-second precision.
    fn unix_now(&self) -> f64;
}

/// Clock backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn unix_now(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedClock(pub f64);

impl WallClock for FixedClock {
    fn unix_now(&self) -> f64 {
        self.0
    }
}
