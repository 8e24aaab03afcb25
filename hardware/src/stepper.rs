//! Coarse actuator: continuous-rotation stepper behind a DRV8825-style
//! driver.
//!
//! The stepper has no absolute reference. Every move is a
//! (direction, count, inter-step delay) pulse train, and the only position
//! state is an advisory relative counter that drifts under manual motion
//! and is never treated as ground truth.
//!
//! Holding current heats the motor, so the enable line is asserted only
//! for the duration of a move and is guaranteed to drop on every exit
//! path, including write failures and cancellation.

use std::time::Duration;

use tracing::{debug, trace};

use shared::cancel::CancelToken;
use shared::types::{AxisId, Direction, MicrostepMode};

use crate::gpio::{GpioError, OutputLine};

/// Result of a pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// All requested pulses were issued.
    Completed { steps: u32 },
    /// The cancel token was observed at a pulse boundary; `steps_issued`
    /// pulses had already gone out.
    Cancelled { steps_issued: u32 },
}

impl StepOutcome {
    pub fn steps_issued(&self) -> u32 {
        match *self {
            StepOutcome::Completed { steps } => steps,
            StepOutcome::Cancelled { steps_issued } => steps_issued,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepOutcome::Cancelled { .. })
    }
}

/// Scoped holding-current guard: enable on entry, disable on drop.
struct EnableGuard<'a> {
    line: &'a mut dyn OutputLine,
}

impl<'a> EnableGuard<'a> {
    fn engage(line: &'a mut dyn OutputLine) -> Result<Self, GpioError> {
        line.set(true)?;
        Ok(Self { line })
    }
}

impl Drop for EnableGuard<'_> {
    fn drop(&mut self) {
        // Cutting holding current must happen even on the error path;
        // a failed write here leaves nothing further to do.
        let _ = self.line.set(false);
    }
}

/// Stepper driver over dir/step/enable plus three microstep mode lines.
pub struct CoarseActuator {
    id: AxisId,
    dir: Box<dyn OutputLine>,
    step: Box<dyn OutputLine>,
    enable: Box<dyn OutputLine>,
    mode: [Box<dyn OutputLine>; 3],
    microstep: MicrostepMode,
    position_steps: i64,
}

impl CoarseActuator {
    /// Construct with all lines driven low and the given microstep mode
    /// applied.
    pub fn new(
        id: AxisId,
        mut dir: Box<dyn OutputLine>,
        mut step: Box<dyn OutputLine>,
        mut enable: Box<dyn OutputLine>,
        mode: [Box<dyn OutputLine>; 3],
        microstep: MicrostepMode,
    ) -> Result<Self, GpioError> {
        dir.set(false)?;
        step.set(false)?;
        enable.set(false)?;
        let mut actuator = Self {
            id,
            dir,
            step,
            enable,
            mode,
            microstep,
            position_steps: 0,
        };
        actuator.set_microstep(microstep)?;
        Ok(actuator)
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn microstep(&self) -> MicrostepMode {
        self.microstep
    }

    /// Advisory step counter. Drifts relative to the real shaft position
    /// and must not be used as an absolute reference.
    pub fn position_steps(&self) -> i64 {
        self.position_steps
    }

    /// Drive the mode lines for the given resolution.
    pub fn set_microstep(&mut self, mode: MicrostepMode) -> Result<(), GpioError> {
        let bits = mode.mode_bits();
        for (line, level) in self.mode.iter_mut().zip(bits) {
            line.set(level)?;
        }
        self.microstep = mode;
        Ok(())
    }

    /// Issue a pulse train: `count` cycles of assert / wait / deassert /
    /// wait with the given inter-step delay.
    ///
    /// Blocks for the full `count * 2 * delay` duration. A zero count is
    /// a no-op that never touches the enable line. The cancel token is
    /// checked before each pulse; in-flight pulses always finish.
    pub fn step(
        &mut self,
        direction: Direction,
        count: u32,
        delay: Duration,
        cancel: &CancelToken,
    ) -> Result<StepOutcome, GpioError> {
        if count == 0 {
            return Ok(StepOutcome::Completed { steps: 0 });
        }
        debug!(axis = %self.id, ?direction, count, delay_us = delay.as_micros() as u64, "stepper move");

        let Self {
            dir,
            step,
            enable,
            position_steps,
            ..
        } = self;
        let _hold = EnableGuard::engage(enable.as_mut())?;
        dir.set(direction.line_level())?;

        let mut issued = 0u32;
        while issued < count {
            if cancel.is_cancelled() {
                trace!(axis = %self.id, issued, "stepper move cancelled");
                return Ok(StepOutcome::Cancelled {
                    steps_issued: issued,
                });
            }
            step.set(true)?;
            std::thread::sleep(delay);
            step.set(false)?;
            std::thread::sleep(delay);
            issued += 1;
            *position_steps += direction.sign();
        }

        Ok(StepOutcome::Completed { steps: issued })
    }

    /// Deassert the enable line, cutting holding current.
    pub fn release(&mut self) -> Result<(), GpioError> {
        self.enable.set(false)
    }
}

impl Drop for CoarseActuator {
    fn drop(&mut self) {
        let _ = self.enable.set(false);
        let _ = self.step.set(false);
    }
}
