//! Actuator drivers for the pan/tilt capture rig.
//!
//! Each axis blends two heterogeneous actuators: a bounded-range servo
//! ([`FineActuator`]) that provides an absolute angular reference, and a
//! continuous-rotation stepper ([`CoarseActuator`]) that extends reach
//! beyond the servo's range. [`Axis`] pairs the two and [`Gimbal`] owns
//! both axes, turning preset poses and pixel-space tracking offsets into
//! physical motion.
//!
//! All GPIO goes through the [`gpio::OutputLine`] trait. On Linux the
//! [`gpio::GpiodBackend`] drives real character-device lines; everywhere
//! else (and in tests) the [`gpio::MockBackend`] records every level
//! change for inspection.

pub mod axis;
pub mod gimbal;
pub mod gpio;
pub mod servo;
pub mod stepper;

pub use axis::Axis;
pub use gimbal::Gimbal;
pub use gpio::{GpioError, HardwareContext, MockBackend, OutputLine};
pub use servo::FineActuator;
pub use stepper::{CoarseActuator, StepOutcome};
