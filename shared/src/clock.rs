//! Clock abstraction for timed sequencing behavior.
//!
//! The sequencer schedules captures against deadlines and waits out settle
//! windows. Routing all of that through a trait lets tests substitute a
//! manually advanced clock and exercise hours of schedule in microseconds.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source plus sleep.
///
/// `now` reports the elapsed time since the clock's own epoch (typically
/// process start). Deadlines are stored as `Duration` offsets against the
/// same epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant`.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock for deterministic tests.
///
/// `sleep` advances time instead of blocking, so a sequencer driven by this
/// clock runs a simulated schedule as fast as the machine can tick.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock without a sleep call.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.sleep(Duration::from_secs(12));
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(15));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
