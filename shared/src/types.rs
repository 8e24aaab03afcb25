//! Core rig types: axes, poses, tracking offsets and camera frames.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one degree of freedom of the rig.
///
/// The rig has exactly two axes. `Pan` sweeps horizontally, `Tilt`
/// vertically. Each axis pairs one fine (servo) and one coarse (stepper)
/// actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisId {
    Pan,
    Tilt,
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisId::Pan => write!(f, "pan"),
            AxisId::Tilt => write!(f, "tilt"),
        }
    }
}

/// Rotation direction for a coarse actuator move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Direction for a signed step delta. Zero maps to `Forward`; callers
    /// treat a zero-count move as a no-op before this matters.
    pub fn from_delta(delta: i64) -> Self {
        if delta < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    /// Level driven onto the DIR line. The driver steps forward with the
    /// line low and backward with it high.
    pub fn line_level(self) -> bool {
        matches!(self, Direction::Backward)
    }

    /// Sign applied to the advisory position counter.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// Microstep resolution of the coarse actuator driver.
///
/// Each mode corresponds to an exhaustively enumerated bit pattern on the
/// driver's three mode pins. Selecting a mode by name happens at
/// configuration load time; an unrecognized name is a configuration error,
/// never a silently ignored command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MicrostepMode {
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "half")]
    Half,
    #[serde(rename = "quarter")]
    Quarter,
    #[serde(rename = "eighth")]
    Eighth,
    #[serde(rename = "sixteenth")]
    Sixteenth,
    #[serde(rename = "thirty-second")]
    ThirtySecond,
}

impl MicrostepMode {
    /// Levels for the (M0, M1, M2) mode pins, in order.
    pub fn mode_bits(self) -> [bool; 3] {
        match self {
            MicrostepMode::Full => [false, false, false],
            MicrostepMode::Half => [true, false, false],
            MicrostepMode::Quarter => [false, true, false],
            MicrostepMode::Eighth => [true, true, false],
            MicrostepMode::Sixteenth => [false, false, true],
            MicrostepMode::ThirtySecond => [true, false, true],
        }
    }
}

/// Pixel-space error between the frame center and the located target.
///
/// Produced once per processed video frame and consumed immediately by the
/// position controller; never stored. Positive `dx` means the target sits
/// right of center, positive `dy` below center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingOffset {
    pub dx: i32,
    pub dy: i32,
    /// Fine-tune corrections use a tighter deadband and smaller, slower
    /// adjustments.
    pub fine_tune: bool,
}

/// One pre-configured target position in the ordered capture sequence.
///
/// Fine angles are absolute servo angles in degrees. Coarse values are
/// signed step deltas relative to wherever the stepper currently sits;
/// nothing in the system treats accumulated step counts as ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresetPose {
    pub index: usize,
    pub fine_pan: f64,
    pub fine_tilt: f64,
    #[serde(default)]
    pub coarse_pan: i64,
    #[serde(default)]
    pub coarse_tilt: i64,
}

/// Capture session mode.
///
/// One state machine serves all three operating styles; the mode only
/// changes which triggers fire, not which code path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// Captures happen only on operator command.
    ManualOnly,
    /// Live target tracking keeps the rig centered between captures.
    TrackingAssisted,
    /// Fixed-interval auto-capture advances through the pose list.
    TimedAuto,
}

/// A single grayscale camera frame.
///
/// Pixel data is 8-bit, row-major, `width * height` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Frame center in pixel coordinates.
    pub fn center(&self) -> (i32, i32) {
        ((self.width / 2) as i32, (self.height / 2) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_delta() {
        assert_eq!(Direction::from_delta(12), Direction::Forward);
        assert_eq!(Direction::from_delta(-3), Direction::Backward);
        assert_eq!(Direction::from_delta(0), Direction::Forward);
    }

    #[test]
    fn microstep_patterns_are_distinct() {
        let modes = [
            MicrostepMode::Full,
            MicrostepMode::Half,
            MicrostepMode::Quarter,
            MicrostepMode::Eighth,
            MicrostepMode::Sixteenth,
            MicrostepMode::ThirtySecond,
        ];
        for (i, a) in modes.iter().enumerate() {
            for b in &modes[i + 1..] {
                assert_ne!(a.mode_bits(), b.mode_bits());
            }
        }
    }

    #[test]
    fn microstep_name_round_trip() {
        let mode: MicrostepMode = serde_json::from_str("\"eighth\"").unwrap();
        assert_eq!(mode, MicrostepMode::Eighth);
        assert!(serde_json::from_str::<MicrostepMode>("\"1/8step\"").is_err());
    }
}
