//! Time seam for bounded waits and settle delays.
//!
//! All polling in the commit path is wall-clock bounded through this trait
//! rather than iteration-capped, so timeout paths can be exercised
//! deterministically with a virtual clock.

pub trait TimeSource {
    /// Monotonic microsecond counter. Only differences are meaningful.
    fn monotonic_us(&self) -> u64;

    /// Block for at least `us` microseconds.
    fn delay_us(&self, us: u32);
}
