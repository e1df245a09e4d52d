//! Monotonic time abstraction shared by the orchestrator and robot loops.
//!
//! Both state machines take the current instant as an argument instead of
//! reading a clock, so hosts pass [`std::time::Instant`] while tests drive
//! them with a counter.

use core::ops::Add;
use core::time::Duration;

/// Monotonic instant accepted by the control loops.
pub trait SessionInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the elapsed duration since `earlier`, saturating at zero.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

impl SessionInstant for std::time::Instant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        std::time::Instant::saturating_duration_since(self, earlier)
    }
}
