//! Monotonic time source.
//!
//! Every wait in the node goes through a [`Clock`], so timing-dependent behavior
//! (settle time, backoff, retries) can run against a [`ManualClock`] in tests and
//! simulations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic clock with a bounded sleep primitive.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block the control loop for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when slept on or advanced.
///
/// Clones share the same time, so every node on a simulated bus sees one timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_timeline() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.sleep(Duration::from_millis(5));
        clock.advance(Duration::from_millis(10));

        assert_eq!(clock.now() - start, Duration::from_millis(15));
        assert_eq!(other.elapsed(), Duration::from_millis(15));
    }
}
