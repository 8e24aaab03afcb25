//! Startup configuration surface.
//!
//! Everything the rig needs to run is loaded from a single JSON file at
//! startup and is immutable afterwards: pin assignments, servo timing,
//! tracking gains, sequencing parameters and the preset pose list.
//! Validation happens entirely at load time so that a bad configuration is
//! a startup failure, never a mid-session surprise.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::{AxisId, MicrostepMode, PresetPose, SessionMode};

/// Configuration loading or validation failure. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("preset pose list is empty")]
    EmptyPoseList,

    #[error("pose at position {position} has index {found}, expected {position}")]
    NonContiguousPoseIndex { position: usize, found: usize },

    #[error("{axis} axis: pose fine angle {angle} outside [{min}, {max}]")]
    PoseAngleOutOfRange {
        axis: AxisId,
        angle: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid servo angle range [{min}, {max}]")]
    InvalidAngleRange { min: f64, max: f64 },

    #[error("invalid servo pulse range [{min_us}, {max_us}] µs")]
    InvalidPulseRange { min_us: u32, max_us: u32 },

    #[error("{axis} axis: expected exactly 3 microstep mode pins, got {count}")]
    BadModePinCount { axis: AxisId, count: usize },

    #[error("GPIO line {line} assigned more than once")]
    DuplicatePin { line: u32 },

    #[error("tracking parameter {name} out of range: {value}")]
    InvalidTrackingParam { name: &'static str, value: f64 },
}

/// GPIO line assignments for one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisPins {
    pub servo: u32,
    pub dir: u32,
    pub step: u32,
    pub enable: u32,
    /// (M0, M1, M2) microstep mode lines, in driver order.
    pub mode: Vec<u32>,
    /// Resolution applied to this axis at startup.
    #[serde(default = "default_microstep")]
    pub microstep: MicrostepMode,
}

fn default_microstep() -> MicrostepMode {
    MicrostepMode::Full
}

/// Fine actuator (servo) parameters, shared by both axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoConfig {
    #[serde(default = "default_min_angle")]
    pub min_angle_deg: f64,
    #[serde(default = "default_max_angle")]
    pub max_angle_deg: f64,
    /// Pulse width commanded at `min_angle_deg`.
    #[serde(default = "default_min_pulse")]
    pub min_pulse_us: u32,
    /// Pulse width commanded at `max_angle_deg`.
    #[serde(default = "default_max_pulse")]
    pub max_pulse_us: u32,
    /// How long the drive signal is held before detaching. The mechanics
    /// need at least 250 ms to reach position.
    #[serde(default = "default_servo_settle_ms")]
    pub settle_ms: u64,
}

fn default_min_angle() -> f64 {
    0.0
}
fn default_max_angle() -> f64 {
    180.0
}
fn default_min_pulse() -> u32 {
    500
}
fn default_max_pulse() -> u32 {
    2500
}
fn default_servo_settle_ms() -> u64 {
    300
}

impl ServoConfig {
    /// Midpoint of the angle range, used as the startup and re-center
    /// position.
    pub fn center_deg(&self) -> f64 {
        (self.min_angle_deg + self.max_angle_deg) / 2.0
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            min_angle_deg: default_min_angle(),
            max_angle_deg: default_max_angle(),
            min_pulse_us: default_min_pulse(),
            max_pulse_us: default_max_pulse(),
            settle_ms: default_servo_settle_ms(),
        }
    }
}

/// Deadband-gated proportional correction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Deadband for ordinary corrections, in pixels.
    #[serde(default = "default_coarse_deadband")]
    pub coarse_deadband_px: i32,
    /// Tighter deadband used when the locator flags a fine-tune pass.
    #[serde(default = "default_fine_deadband")]
    pub fine_deadband_px: i32,
    /// Servo adjustment per correction, degrees.
    #[serde(default = "default_coarse_gain")]
    pub coarse_gain_deg: f64,
    #[serde(default = "default_fine_gain")]
    pub fine_gain_deg: f64,
    /// Pixels of offset per coarse correction step.
    #[serde(default = "default_px_per_step")]
    pub px_per_step: i32,
    /// Inter-step delay for ordinary coarse corrections, milliseconds.
    #[serde(default = "default_coarse_step_delay")]
    pub coarse_step_delay_ms: u64,
    /// Inter-step delay for fine-tune coarse corrections, milliseconds.
    #[serde(default = "default_fine_step_delay")]
    pub fine_step_delay_ms: u64,
    /// Microstep resolution used while correcting.
    #[serde(default = "default_correction_microstep")]
    pub correction_microstep: MicrostepMode,
}

fn default_coarse_deadband() -> i32 {
    20
}
fn default_fine_deadband() -> i32 {
    10
}
fn default_coarse_gain() -> f64 {
    1.0
}
fn default_fine_gain() -> f64 {
    0.5
}
fn default_px_per_step() -> i32 {
    5
}
fn default_coarse_step_delay() -> u64 {
    2
}
fn default_fine_step_delay() -> u64 {
    1
}
fn default_correction_microstep() -> MicrostepMode {
    MicrostepMode::Eighth
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            coarse_deadband_px: default_coarse_deadband(),
            fine_deadband_px: default_fine_deadband(),
            coarse_gain_deg: default_coarse_gain(),
            fine_gain_deg: default_fine_gain(),
            px_per_step: default_px_per_step(),
            coarse_step_delay_ms: default_coarse_step_delay(),
            fine_step_delay_ms: default_fine_step_delay(),
            correction_microstep: default_correction_microstep(),
        }
    }
}

/// Capture sequencing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    #[serde(default = "default_mode")]
    pub mode: SessionMode,
    /// Auto-capture interval, seconds.
    #[serde(default = "default_auto_interval")]
    pub auto_interval_secs: u64,
    /// Settle window after a pose move before the frame is taken.
    #[serde(default = "default_stabilize_ms")]
    pub stabilize_ms: u64,
    /// Timeout waiting for a frame in the capturing state.
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
    /// Inter-step delay for preset pose moves, milliseconds.
    #[serde(default = "default_move_step_delay")]
    pub move_step_delay_ms: u64,
}

fn default_mode() -> SessionMode {
    SessionMode::ManualOnly
}
fn default_auto_interval() -> u64 {
    12
}
fn default_stabilize_ms() -> u64 {
    1000
}
fn default_frame_timeout_ms() -> u64 {
    5000
}
fn default_move_step_delay() -> u64 {
    5
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            auto_interval_secs: default_auto_interval(),
            stabilize_ms: default_stabilize_ms(),
            frame_timeout_ms: default_frame_timeout_ms(),
            move_step_delay_ms: default_move_step_delay(),
        }
    }
}

/// Complete rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    pub pan: AxisPins,
    pub tilt: AxisPins,
    #[serde(default)]
    pub servo: ServoConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    pub poses: Vec<PresetPose>,
}

impl RigConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), poses = config.poses.len(), "loaded rig configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servo.min_angle_deg >= self.servo.max_angle_deg {
            return Err(ConfigError::InvalidAngleRange {
                min: self.servo.min_angle_deg,
                max: self.servo.max_angle_deg,
            });
        }
        if self.servo.min_pulse_us >= self.servo.max_pulse_us {
            return Err(ConfigError::InvalidPulseRange {
                min_us: self.servo.min_pulse_us,
                max_us: self.servo.max_pulse_us,
            });
        }

        // The correction law divides by px_per_step and scales by the
        // gains; none of these survive zero or negative values, and a
        // negative deadband would correct offsets that are already inside
        // it.
        if self.tracking.px_per_step <= 0 {
            return Err(ConfigError::InvalidTrackingParam {
                name: "px_per_step",
                value: self.tracking.px_per_step as f64,
            });
        }
        for (name, value) in [
            ("coarse_gain_deg", self.tracking.coarse_gain_deg),
            ("fine_gain_deg", self.tracking.fine_gain_deg),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::InvalidTrackingParam { name, value });
            }
        }
        for (name, value) in [
            ("coarse_deadband_px", self.tracking.coarse_deadband_px),
            ("fine_deadband_px", self.tracking.fine_deadband_px),
        ] {
            if value < 0 {
                return Err(ConfigError::InvalidTrackingParam {
                    name,
                    value: value as f64,
                });
            }
        }

        for (axis, pins) in [(AxisId::Pan, &self.pan), (AxisId::Tilt, &self.tilt)] {
            if pins.mode.len() != 3 {
                return Err(ConfigError::BadModePinCount {
                    axis,
                    count: pins.mode.len(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for pins in [&self.pan, &self.tilt] {
            for line in pins
                .mode
                .iter()
                .copied()
                .chain([pins.servo, pins.dir, pins.step, pins.enable])
            {
                if !seen.insert(line) {
                    return Err(ConfigError::DuplicatePin { line });
                }
            }
        }

        if self.poses.is_empty() {
            return Err(ConfigError::EmptyPoseList);
        }
        for (position, pose) in self.poses.iter().enumerate() {
            if pose.index != position {
                return Err(ConfigError::NonContiguousPoseIndex {
                    position,
                    found: pose.index,
                });
            }
            for (axis, angle) in [(AxisId::Pan, pose.fine_pan), (AxisId::Tilt, pose.fine_tilt)] {
                if angle < self.servo.min_angle_deg || angle > self.servo.max_angle_deg {
                    return Err(ConfigError::PoseAngleOutOfRange {
                        axis,
                        angle,
                        min: self.servo.min_angle_deg,
                        max: self.servo.max_angle_deg,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn pins(&self, axis: AxisId) -> &AxisPins {
        match axis {
            AxisId::Pan => &self.pan,
            AxisId::Tilt => &self.tilt,
        }
    }
}
