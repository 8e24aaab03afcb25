//! Dual-axis position controller.
//!
//! Owns both axes and converts 2-D targets into per-axis commands. Axis
//! moves are sequential, never parallel; actuator commands are inherently
//! serialized by the hardware, so there is exactly one logical owner of
//! actuator state and it is this struct's caller.

use std::time::Duration;

use tracing::{debug, info};

use shared::cancel::CancelToken;
use shared::config::{RigConfig, TrackingConfig};
use shared::types::{AxisId, PresetPose, TrackingOffset};

use crate::axis::Axis;
use crate::gpio::{GpioError, HardwareContext};
use crate::servo::FineActuator;
use crate::stepper::CoarseActuator;

/// The pan/tilt head: two axes and the correction parameters.
pub struct Gimbal {
    pan: Axis,
    tilt: Axis,
    tracking: TrackingConfig,
    move_step_delay: Duration,
}

impl Gimbal {
    /// Build both axes from configuration, claiming every GPIO line.
    ///
    /// # Errors
    /// Any unavailable line is a startup configuration failure; no axis
    /// is partially constructed.
    pub fn from_config(config: &RigConfig, ctx: &mut HardwareContext) -> Result<Self, GpioError> {
        let pan = Self::build_axis(AxisId::Pan, config, ctx)?;
        let tilt = Self::build_axis(AxisId::Tilt, config, ctx)?;
        info!("gimbal initialized, servos centered");
        Ok(Self {
            pan,
            tilt,
            tracking: config.tracking.clone(),
            move_step_delay: Duration::from_millis(config.sequence.move_step_delay_ms),
        })
    }

    fn build_axis(
        id: AxisId,
        config: &RigConfig,
        ctx: &mut HardwareContext,
    ) -> Result<Axis, GpioError> {
        let pins = config.pins(id);
        let servo_pin = ctx.claim_output(pins.servo, &format!("{id}-servo"))?;
        let fine = FineActuator::new(id, servo_pin, config.servo.clone());

        let dir = ctx.claim_output(pins.dir, &format!("{id}-dir"))?;
        let step = ctx.claim_output(pins.step, &format!("{id}-step"))?;
        let enable = ctx.claim_output(pins.enable, &format!("{id}-enable"))?;
        // Pin count was validated at config load.
        let m0 = ctx.claim_output(pins.mode[0], &format!("{id}-m0"))?;
        let m1 = ctx.claim_output(pins.mode[1], &format!("{id}-m1"))?;
        let m2 = ctx.claim_output(pins.mode[2], &format!("{id}-m2"))?;
        let coarse = CoarseActuator::new(id, dir, step, enable, [m0, m1, m2], pins.microstep)?;

        Ok(Axis::new(id, fine, coarse))
    }

    pub fn axis(&self, id: AxisId) -> &Axis {
        match id {
            AxisId::Pan => &self.pan,
            AxisId::Tilt => &self.tilt,
        }
    }

    pub fn axis_mut(&mut self, id: AxisId) -> &mut Axis {
        match id {
            AxisId::Pan => &mut self.pan,
            AxisId::Tilt => &mut self.tilt,
        }
    }

    /// Move both axes to a preset pose: pan then tilt, each fine actuator
    /// before its coarse actuator. Returns once both physical moves have
    /// completed or the token cancels the remainder.
    pub fn move_to_pose(
        &mut self,
        pose: &PresetPose,
        cancel: &CancelToken,
    ) -> Result<(), GpioError> {
        debug!(pose = pose.index, "moving to preset pose");
        let outcome = self.pan.move_toward(
            pose.fine_pan,
            pose.coarse_pan,
            self.move_step_delay,
            cancel,
        )?;
        if outcome.is_cancelled() {
            return Ok(());
        }
        self.tilt.move_toward(
            pose.fine_tilt,
            pose.coarse_tilt,
            self.move_step_delay,
            cancel,
        )?;
        Ok(())
    }

    /// Apply one tracking offset sample, independently per axis.
    pub fn correct_from_offset(
        &mut self,
        offset: &TrackingOffset,
        cancel: &CancelToken,
    ) -> Result<(), GpioError> {
        let tracking = self.tracking.clone();
        let outcome = self
            .pan
            .correct(offset.dx, offset.fine_tune, &tracking, cancel)?;
        if outcome.is_cancelled() {
            return Ok(());
        }
        self.tilt
            .correct(offset.dy, offset.fine_tune, &tracking, cancel)?;
        Ok(())
    }

    /// Re-center both servos (operator navigation between poses).
    pub fn center(&mut self) -> Result<(), GpioError> {
        self.pan.center_fine()?;
        self.tilt.center_fine()?;
        Ok(())
    }

    /// Force both axes into a safe resting state.
    pub fn stop(&mut self) -> Result<(), GpioError> {
        let pan = self.pan.stop();
        let tilt = self.tilt.stop();
        pan?;
        tilt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{MockBackend, PinLog};
    use approx::assert_relative_eq;
    use shared::config::RigConfig;

    const PAN_STEP: u32 = 19;
    const TILT_STEP: u32 = 18;

    fn test_config() -> RigConfig {
        RigConfig::from_json(
            r#"{
                "pan":  { "servo": 5, "dir": 13, "step": 19, "enable": 12, "mode": [16, 17, 20], "microstep": "eighth" },
                "tilt": { "servo": 6, "dir": 24, "step": 18, "enable": 4,  "mode": [21, 22, 27], "microstep": "eighth" },
                "servo": { "settle_ms": 0 },
                "tracking": { "coarse_step_delay_ms": 0, "fine_step_delay_ms": 0 },
                "sequence": { "move_step_delay_ms": 0 },
                "poses": [
                    { "index": 0, "fine_pan": 90.0, "fine_tilt": 160.0, "coarse_pan": 4, "coarse_tilt": -3 }
                ]
            }"#,
        )
        .unwrap()
    }

    fn gimbal() -> (Gimbal, PinLog) {
        let backend = MockBackend::new();
        let log = backend.log();
        let mut ctx = HardwareContext::new(Box::new(backend));
        let gimbal = Gimbal::from_config(&test_config(), &mut ctx).unwrap();
        (gimbal, log)
    }

    #[test]
    fn pose_move_commands_both_axes() {
        let (mut gimbal, log) = gimbal();
        log.clear();
        let pose = test_config().poses[0];
        gimbal.move_to_pose(&pose, &CancelToken::new()).unwrap();
        assert_relative_eq!(gimbal.axis(AxisId::Pan).fine_angle(), 90.0);
        assert_relative_eq!(gimbal.axis(AxisId::Tilt).fine_angle(), 160.0);
        assert_eq!(log.rising_edges(PAN_STEP), 4);
        assert_eq!(log.rising_edges(TILT_STEP), 3);
        assert_eq!(gimbal.axis(AxisId::Pan).coarse_position(), 4);
        assert_eq!(gimbal.axis(AxisId::Tilt).coarse_position(), -3);
    }

    #[test]
    fn offsets_inside_deadband_issue_no_coarse_steps() {
        let (mut gimbal, log) = gimbal();
        log.clear();
        let offset = TrackingOffset {
            dx: 15,
            dy: -18,
            fine_tune: false,
        };
        gimbal
            .correct_from_offset(&offset, &CancelToken::new())
            .unwrap();
        assert_eq!(log.rising_edges(PAN_STEP), 0);
        assert_eq!(log.rising_edges(TILT_STEP), 0);
        assert_relative_eq!(gimbal.axis(AxisId::Pan).fine_angle(), 90.0);
    }

    #[test]
    fn offsets_past_deadband_blend_both_actuators() {
        let (mut gimbal, log) = gimbal();
        log.clear();
        let offset = TrackingOffset {
            dx: 30,
            dy: -25,
            fine_tune: false,
        };
        gimbal
            .correct_from_offset(&offset, &CancelToken::new())
            .unwrap();
        // dx = 30: servo backs off one degree, stepper issues 30/5 pulses.
        assert_relative_eq!(gimbal.axis(AxisId::Pan).fine_angle(), 89.0);
        assert_eq!(log.rising_edges(PAN_STEP), 6);
        assert_relative_eq!(gimbal.axis(AxisId::Tilt).fine_angle(), 91.0);
        assert_eq!(log.rising_edges(TILT_STEP), 5);
    }

    #[test]
    fn fine_corrections_move_half_as_far() {
        let (mut gimbal, _) = gimbal();
        let offset = TrackingOffset {
            dx: 12,
            dy: 0,
            fine_tune: true,
        };
        gimbal
            .correct_from_offset(&offset, &CancelToken::new())
            .unwrap();
        assert_relative_eq!(gimbal.axis(AxisId::Pan).fine_angle(), 89.5);
    }

    #[test]
    fn cancelled_pose_move_skips_the_second_axis() {
        let (mut gimbal, log) = gimbal();
        log.clear();
        let cancel = CancelToken::new();
        cancel.cancel();
        let pose = test_config().poses[0];
        gimbal.move_to_pose(&pose, &cancel).unwrap();
        assert_eq!(log.rising_edges(PAN_STEP), 0);
        assert_eq!(log.rising_edges(TILT_STEP), 0);
    }

    #[test]
    fn unavailable_line_fails_construction() {
        let backend = MockBackend::new();
        let mut ctx = HardwareContext::new(Box::new(backend));
        let mut config = test_config();
        config.tilt.servo = config.pan.servo;
        let Err(err) = Gimbal::from_config(&config, &mut ctx) else {
            panic!("duplicate servo pin was accepted");
        };
        assert!(matches!(err, GpioError::Unavailable { .. }));
    }
}
