//! Shared components for the pan/tilt capture rig.
//!
//! This crate holds the types that cross module boundaries: axis and pose
//! definitions, the configuration surface loaded at startup, the clock
//! abstraction used to make timed behavior testable, and the cancellation
//! token observed by blocking actuator moves.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod types;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RigConfig};
pub use types::{AxisId, Direction, Frame, MicrostepMode, PresetPose, SessionMode, TrackingOffset};
