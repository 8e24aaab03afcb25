//! Fine actuator: bounded-range hobby servo.
//!
//! The servo gives each axis an absolute angular reference over a fixed
//! range. It is commanded by a 50 Hz pulse train whose pulse width maps
//! linearly from the angle range onto the configured microsecond range.
//! After the settle window the signal is removed entirely; holding the
//! pulse train makes the horn buzz against its load.
//!
//! There is no position feedback at this layer. A move that the physical
//! horn fails to complete is undetectable here, so a single settle
//! attempt per call is all the driver does.

use std::time::{Duration, Instant};

use tracing::debug;

use shared::config::ServoConfig;
use shared::types::AxisId;

use crate::gpio::{GpioError, OutputLine};

/// PWM frame period (50 Hz).
const FRAME: Duration = Duration::from_millis(20);

/// Software-PWM servo on a single output line.
pub struct FineActuator {
    id: AxisId,
    pin: Box<dyn OutputLine>,
    config: ServoConfig,
    current_angle_deg: f64,
}

impl FineActuator {
    /// Create a servo centered at the midpoint of its range.
    ///
    /// The drive signal stays detached until the first move.
    pub fn new(id: AxisId, pin: Box<dyn OutputLine>, config: ServoConfig) -> Self {
        let center = config.center_deg();
        Self {
            id,
            pin,
            config,
            current_angle_deg: center,
        }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    /// Last committed angle in degrees. Within range by construction.
    pub fn current_angle(&self) -> f64 {
        self.current_angle_deg
    }

    /// Clamp a requested angle into the configured range.
    pub fn clamp(&self, angle_deg: f64) -> f64 {
        angle_deg.clamp(self.config.min_angle_deg, self.config.max_angle_deg)
    }

    fn pulse_width(&self, angle_deg: f64) -> Duration {
        let span = self.config.max_angle_deg - self.config.min_angle_deg;
        let fraction = (angle_deg - self.config.min_angle_deg) / span;
        let us = self.config.min_pulse_us as f64
            + fraction * (self.config.max_pulse_us - self.config.min_pulse_us) as f64;
        Duration::from_micros(us.round() as u64)
    }

    /// Move to an absolute angle and return the clamped angle committed.
    ///
    /// Blocks for the configured settle duration while the pulse train is
    /// held, then detaches the signal. Calling with an in-range angle is
    /// idempotent in its committed result.
    pub fn move_to_angle(&mut self, target_deg: f64) -> Result<f64, GpioError> {
        let committed = self.clamp(target_deg);
        let width = self.pulse_width(committed);
        debug!(axis = %self.id, target = target_deg, committed, pulse_us = width.as_micros() as u64, "servo move");

        let settle = Duration::from_millis(self.config.settle_ms);
        let deadline = Instant::now() + settle;
        while Instant::now() < deadline {
            self.pin.set(true)?;
            std::thread::sleep(width);
            self.pin.set(false)?;
            std::thread::sleep(FRAME.saturating_sub(width));
        }
        // Signal stays low from here on: the horn is detached.
        self.current_angle_deg = committed;
        Ok(committed)
    }

    /// Move by a relative angle, clamped into range.
    pub fn nudge(&mut self, delta_deg: f64) -> Result<f64, GpioError> {
        self.move_to_angle(self.current_angle_deg + delta_deg)
    }

    /// Return to the midpoint of the range.
    pub fn center(&mut self) -> Result<f64, GpioError> {
        self.move_to_angle(self.config.center_deg())
    }
}

impl Drop for FineActuator {
    fn drop(&mut self) {
        // Zero the drive signal on shutdown; nothing to report if the
        // line write fails while tearing down.
        let _ = self.pin.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{GpioBackend, MockBackend};
    use approx::assert_relative_eq;

    fn servo(settle_ms: u64) -> (FineActuator, crate::gpio::PinLog) {
        let mut backend = MockBackend::new();
        let log = backend.log();
        let pin = backend.claim_output(5, "servo-pan").unwrap();
        let config = ServoConfig {
            settle_ms,
            ..ServoConfig::default()
        };
        (FineActuator::new(AxisId::Pan, pin, config), log)
    }

    #[test]
    fn starts_centered() {
        let (servo, _) = servo(0);
        assert_relative_eq!(servo.current_angle(), 90.0);
    }

    #[test]
    fn clamps_out_of_range_targets() {
        let (mut servo, _) = servo(0);
        assert_relative_eq!(servo.move_to_angle(270.0).unwrap(), 180.0);
        assert_relative_eq!(servo.move_to_angle(-45.0).unwrap(), 0.0);
        assert_relative_eq!(servo.current_angle(), 0.0);
    }

    #[test]
    fn in_range_moves_are_idempotent() {
        let (mut servo, _) = servo(0);
        let first = servo.move_to_angle(72.5).unwrap();
        let second = servo.move_to_angle(72.5).unwrap();
        assert_relative_eq!(first, second);
        assert_relative_eq!(servo.current_angle(), 72.5);
    }

    #[test]
    fn pulse_width_maps_linearly() {
        let (servo, _) = servo(0);
        assert_eq!(servo.pulse_width(0.0), Duration::from_micros(500));
        assert_eq!(servo.pulse_width(90.0), Duration::from_micros(1500));
        assert_eq!(servo.pulse_width(180.0), Duration::from_micros(2500));
    }

    #[test]
    fn signal_detaches_after_move() {
        let (mut servo, log) = servo(25);
        servo.move_to_angle(45.0).unwrap();
        assert!(log.rising_edges(5) >= 1);
        assert_eq!(log.last_level(5), Some(false));
    }

    #[test]
    fn drop_zeroes_the_drive_signal() {
        let (servo, log) = servo(0);
        drop(servo);
        assert_eq!(log.last_level(5), Some(false));
    }
}
