//! Signed, quantizable microsecond time values.
//!
//! `std::time::Instant`/`Duration` cover the wall-clock side of this crate
//! (packet dwell time, timer deadlines); they can't represent the TWCC
//! codec's signed receive deltas or the "round down to a 64ms boundary"
//! reference-time arithmetic. `MicroTime` fills that gap.

use std::ops::{Add, Sub};

/// A signed offset in microseconds, relative to an arbitrary local epoch.
///
/// Used for TWCC reference times and receive deltas (spec: draft-holmer-
/// rmcat-transport-wide-cc-extensions-01), both of which are quantized
/// (64ms, 250µs respectively) and may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MicroTime(i64);

impl MicroTime {
    pub const ZERO: MicroTime = MicroTime(0);

    pub const fn from_micros(us: i64) -> Self {
        MicroTime(us)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Round down to the nearest multiple of `grid_us` microseconds.
    pub fn floor_to(self, grid_us: i64) -> Self {
        MicroTime(self.0.div_euclid(grid_us) * grid_us)
    }

    /// Truncating division into integer ticks of `tick_us` microseconds
    /// each (rounds toward zero, matching the codec's `trunc(delta/250)`).
    pub fn ticks(self, tick_us: i64) -> i64 {
        self.0 / tick_us
    }

    pub fn from_ticks(ticks: i64, tick_us: i64) -> Self {
        MicroTime(ticks * tick_us)
    }
}

impl Sub for MicroTime {
    type Output = MicroTime;
    fn sub(self, rhs: MicroTime) -> MicroTime {
        MicroTime(self.0 - rhs.0)
    }
}

impl Add for MicroTime {
    type Output = MicroTime;
    fn add(self, rhs: MicroTime) -> MicroTime {
        MicroTime(self.0 + rhs.0)
    }
}
