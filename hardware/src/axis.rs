//! One degree of freedom: a fine and a coarse actuator working together.
//!
//! The servo centers the working range with an absolute reference; the
//! stepper extends reach without one. A logical move commands the servo
//! first (absolute angle) and then the stepper (relative delta), and a
//! tracking correction blends a small servo adjustment with a
//! proportional burst of stepper pulses.

use std::time::Duration;

use tracing::trace;

use shared::cancel::CancelToken;
use shared::config::TrackingConfig;
use shared::types::{AxisId, Direction, MicrostepMode};

use crate::gpio::GpioError;
use crate::servo::FineActuator;
use crate::stepper::{CoarseActuator, StepOutcome};

/// Commands derived from one offset sample for one axis.
///
/// Computed as a pure function of the offset so the correction law can be
/// checked without hardware in the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionPlan {
    /// Signed servo adjustment in degrees (pre-clamp).
    pub fine_delta_deg: f64,
    /// Stepper pulses toward reducing the offset.
    pub coarse_steps: u32,
    pub coarse_direction: Direction,
    pub step_delay: Duration,
    pub microstep: MicrostepMode,
}

/// Deadband-gated proportional law for one axis.
///
/// Returns `None` when the offset magnitude is inside the deadband: no
/// correction of any kind is issued, which is what keeps the rig from
/// oscillating around a settled target.
pub fn correction_plan(
    offset_px: i32,
    fine_tune: bool,
    config: &TrackingConfig,
) -> Option<CorrectionPlan> {
    let deadband = if fine_tune {
        config.fine_deadband_px
    } else {
        config.coarse_deadband_px
    };
    if offset_px.abs() <= deadband {
        return None;
    }

    let gain = if fine_tune {
        config.fine_gain_deg
    } else {
        config.coarse_gain_deg
    };
    // A positive offset means the target sits right of (or below) center,
    // so the angle decreases to swing the camera toward it.
    let fine_delta_deg = if offset_px > 0 { -gain } else { gain };

    let coarse_steps = (offset_px.abs() / config.px_per_step) as u32;
    let coarse_direction = if offset_px > 0 {
        Direction::Backward
    } else {
        Direction::Forward
    };
    let delay_ms = if fine_tune {
        config.fine_step_delay_ms
    } else {
        config.coarse_step_delay_ms
    };

    Some(CorrectionPlan {
        fine_delta_deg,
        coarse_steps,
        coarse_direction,
        step_delay: Duration::from_millis(delay_ms),
        microstep: config.correction_microstep,
    })
}

/// A pan or tilt axis.
pub struct Axis {
    id: AxisId,
    fine: FineActuator,
    coarse: CoarseActuator,
}

impl Axis {
    pub fn new(id: AxisId, fine: FineActuator, coarse: CoarseActuator) -> Self {
        Self { id, fine, coarse }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    /// Current committed servo angle, degrees.
    pub fn fine_angle(&self) -> f64 {
        self.fine.current_angle()
    }

    /// Advisory stepper counter. Not an absolute reference.
    pub fn coarse_position(&self) -> i64 {
        self.coarse.position_steps()
    }

    /// Move toward a logical position: absolute servo angle first, then a
    /// relative stepper delta. Blocks until both complete.
    pub fn move_toward(
        &mut self,
        fine_angle_deg: f64,
        coarse_delta_steps: i64,
        step_delay: Duration,
        cancel: &CancelToken,
    ) -> Result<StepOutcome, GpioError> {
        self.fine.move_to_angle(fine_angle_deg)?;
        if coarse_delta_steps == 0 {
            return Ok(StepOutcome::Completed { steps: 0 });
        }
        let direction = Direction::from_delta(coarse_delta_steps);
        self.coarse.step(
            direction,
            coarse_delta_steps.unsigned_abs() as u32,
            step_delay,
            cancel,
        )
    }

    /// Apply one tracking correction sample to this axis.
    pub fn correct(
        &mut self,
        offset_px: i32,
        fine_tune: bool,
        config: &TrackingConfig,
        cancel: &CancelToken,
    ) -> Result<StepOutcome, GpioError> {
        let Some(plan) = correction_plan(offset_px, fine_tune, config) else {
            return Ok(StepOutcome::Completed { steps: 0 });
        };
        trace!(axis = %self.id, offset_px, fine_tune, ?plan, "applying correction");

        self.fine.nudge(plan.fine_delta_deg)?;
        if plan.coarse_steps == 0 {
            return Ok(StepOutcome::Completed { steps: 0 });
        }
        self.coarse.set_microstep(plan.microstep)?;
        self.coarse.step(
            plan.coarse_direction,
            plan.coarse_steps,
            plan.step_delay,
            cancel,
        )
    }

    /// Nudge the servo by a relative angle (operator jog).
    pub fn jog_fine(&mut self, delta_deg: f64) -> Result<f64, GpioError> {
        self.fine.nudge(delta_deg)
    }

    /// Jog the stepper by a signed step count (operator jog).
    pub fn jog_coarse(
        &mut self,
        delta_steps: i64,
        step_delay: Duration,
        cancel: &CancelToken,
    ) -> Result<StepOutcome, GpioError> {
        if delta_steps == 0 {
            return Ok(StepOutcome::Completed { steps: 0 });
        }
        self.coarse.step(
            Direction::from_delta(delta_steps),
            delta_steps.unsigned_abs() as u32,
            step_delay,
            cancel,
        )
    }

    /// Re-center the servo at the midpoint of its range.
    pub fn center_fine(&mut self) -> Result<f64, GpioError> {
        self.fine.center()
    }

    /// Force the axis into a safe resting state: stepper holding current
    /// cut, servo signal already detached after its last move.
    pub fn stop(&mut self) -> Result<(), GpioError> {
        self.coarse.release()
    }
}
