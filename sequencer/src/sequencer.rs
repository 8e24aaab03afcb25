//! The capture sequencer state machine.
//!
//! One [`CaptureSequencer`] owns the gimbal, the camera, the store and the
//! locator, and is the only writer of actuator state. Operator input
//! arrives through a command channel; timing flows through the [`Clock`]
//! trait so the whole schedule is testable against a manual clock.
//!
//! Tracking corrections and the capture chain are mutually exclusive by
//! construction: the correction loop only runs inside the `Tracking` state
//! and every transition out of it clears the loop flag before any capture
//! work starts.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use hardware::gimbal::Gimbal;
use shared::cancel::CancelToken;
use shared::clock::Clock;
use shared::config::SequenceConfig;
use shared::types::{Frame, PresetPose, SessionMode};

use crate::camera::FrameSource;
use crate::locator::TargetLocator;
use crate::state::{CaptureSession, Command, SequencerEvent, SequencerState, Transition};
use crate::store::CaptureStore;

/// Largest single sleep taken while waiting out a deadline, so cancel
/// and command handling stay responsive.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Drives the ordered pose list through the capture state machine.
pub struct CaptureSequencer<C, S, L>
where
    C: FrameSource,
    S: CaptureStore,
    L: TargetLocator,
{
    gimbal: Gimbal,
    camera: C,
    store: S,
    locator: L,
    clock: Arc<dyn Clock>,
    poses: Vec<PresetPose>,
    config: SequenceConfig,
    mode: SessionMode,
    cancel: CancelToken,

    state: SequencerState,
    session: CaptureSession,
    transitions: Vec<Transition>,
    /// True only while the correction loop may touch the actuators.
    tracking_loop_active: bool,
    /// Frame captured but not yet persisted. Kept across a store failure
    /// so a retry does not re-drive the mechanics.
    pending_frame: Option<(usize, Frame)>,
    last_error: Option<String>,
    shutdown: bool,

    commands: Receiver<Command>,
    command_tx: Sender<Command>,
    events: Option<Sender<SequencerEvent>>,
}

impl<C, S, L> CaptureSequencer<C, S, L>
where
    C: FrameSource,
    S: CaptureStore,
    L: TargetLocator,
{
    pub fn new(
        gimbal: Gimbal,
        camera: C,
        store: S,
        locator: L,
        poses: Vec<PresetPose>,
        config: SequenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (command_tx, commands) = unbounded();
        let session = CaptureSession::new(Duration::from_secs(config.auto_interval_secs));
        let mode = config.mode;
        Self {
            gimbal,
            camera,
            store,
            locator,
            clock,
            poses,
            config,
            mode,
            cancel: CancelToken::new(),
            state: SequencerState::Idle,
            session,
            transitions: Vec::new(),
            tracking_loop_active: false,
            pending_frame: None,
            last_error: None,
            shutdown: false,
            commands,
            command_tx,
            events: None,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Direct access to the frame source, for harnesses that steer the
    /// synthetic target.
    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    /// Sender half of the operator command channel.
    pub fn command_sender(&self) -> Sender<Command> {
        self.command_tx.clone()
    }

    /// Token that interrupts in-flight actuator moves from another thread.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Subscribe to sequencer notifications. Replaces any earlier
    /// subscriber.
    pub fn events(&mut self) -> Receiver<SequencerEvent> {
        let (tx, rx) = unbounded();
        self.events = Some(tx);
        rx
    }

    fn emit(&self, event: SequencerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// The single mutation path for the state field. Recomputes the
    /// correction-loop flag for the destination state and records the
    /// transition.
    fn transition(&mut self, to: SequencerState) {
        let from = self.state;
        self.tracking_loop_active = match to {
            SequencerState::Tracking => {
                self.mode == SessionMode::TrackingAssisted && !self.session.auto_capture_enabled
            }
            _ => false,
        };
        let record = Transition {
            from,
            to,
            at: self.clock.now(),
            tracking_active: self.tracking_loop_active,
        };
        self.transitions.push(record);
        info!(%from, %to, "state change");
        self.state = to;
        self.emit(SequencerEvent::StateChanged { from, to });
    }

    fn fault(&mut self, message: String) {
        error!(state = %self.state, "{message}");
        // The drivers release holding current on their own exit paths;
        // this covers any that don't.
        if let Err(e) = self.gimbal.stop() {
            warn!("failed to rest actuators after fault: {e}");
        }
        self.last_error = Some(message.clone());
        self.emit(SequencerEvent::Fault(message));
        self.transition(SequencerState::Error);
    }

    /// Run one slice of the current state's work. Never panics and never
    /// returns an error; faults land in the `Error` state instead.
    pub fn tick(&mut self) {
        match self.state {
            SequencerState::Idle | SequencerState::Complete | SequencerState::Error => {}
            SequencerState::Tracking => self.tick_tracking(),
            SequencerState::MovingToPosition => self.tick_moving(),
            SequencerState::Stabilizing => self.tick_stabilizing(),
            SequencerState::Capturing => self.tick_capturing(),
            SequencerState::Saving => self.tick_saving(),
            SequencerState::Advancing => self.tick_advancing(),
        }
    }

    fn tick_tracking(&mut self) {
        if self.session.auto_capture_enabled {
            let now = self.clock.now();
            let deadline = *self
                .session
                .next_capture_deadline
                .get_or_insert(now + self.session.auto_interval);
            if now >= deadline {
                debug!(pose = self.session.current_pose_index, "auto-capture deadline reached");
                self.transition(SequencerState::MovingToPosition);
            } else {
                self.clock.sleep((deadline - now).min(WAIT_SLICE));
            }
            return;
        }

        if !self.tracking_loop_active {
            self.clock.sleep(WAIT_SLICE);
            return;
        }

        let timeout = Duration::from_millis(self.config.frame_timeout_ms);
        match self.camera.grab_frame(timeout) {
            Ok(frame) => {
                if let Some(offset) = self.locator.detect(&frame) {
                    if let Err(e) = self.gimbal.correct_from_offset(&offset, &self.cancel) {
                        self.fault(format!("tracking correction failed: {e}"));
                    }
                }
            }
            Err(e) => self.fault(format!("tracking frame acquisition failed: {e}")),
        }
    }

    fn tick_moving(&mut self) {
        let pose = self.poses[self.session.current_pose_index];
        if let Err(e) = self.gimbal.move_to_pose(&pose, &self.cancel) {
            self.fault(format!("pose move failed: {e}"));
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel.clear();
            self.transition(SequencerState::Idle);
            return;
        }
        self.transition(SequencerState::Stabilizing);
    }

    fn tick_stabilizing(&mut self) {
        let settle = Duration::from_millis(self.config.stabilize_ms);
        if self.session.auto_capture_enabled {
            // Visible countdown in unattended mode.
            for remaining in (1..=3u32).rev() {
                self.emit(SequencerEvent::Countdown(remaining));
                self.clock.sleep(settle / 3);
                if self.cancel.is_cancelled() {
                    self.cancel.clear();
                    self.transition(SequencerState::Idle);
                    return;
                }
            }
        } else {
            let deadline = self.clock.now() + settle;
            loop {
                let now = self.clock.now();
                if now >= deadline {
                    break;
                }
                if self.cancel.is_cancelled() {
                    self.cancel.clear();
                    self.transition(SequencerState::Idle);
                    return;
                }
                self.clock.sleep((deadline - now).min(WAIT_SLICE));
            }
        }
        self.transition(SequencerState::Capturing);
    }

    fn tick_capturing(&mut self) {
        let timeout = Duration::from_millis(self.config.frame_timeout_ms);
        match self.camera.grab_frame(timeout) {
            Ok(frame) => {
                self.pending_frame = Some((self.session.current_pose_index, frame));
                self.transition(SequencerState::Saving);
            }
            Err(e) => self.fault(format!("capture failed: {e}")),
        }
    }

    fn tick_saving(&mut self) {
        let Some((pose_index, frame)) = self.pending_frame.take() else {
            // Nothing staged; treat as already saved.
            self.transition(SequencerState::Advancing);
            return;
        };
        match self.store.save(pose_index, &frame) {
            Ok(identifier) => {
                self.emit(SequencerEvent::CaptureSaved {
                    pose_index,
                    identifier,
                });
                self.transition(SequencerState::Advancing);
            }
            Err(e) => {
                // Keep the frame so a retry skips the mechanics entirely.
                self.pending_frame = Some((pose_index, frame));
                self.fault(format!("store failed for pose {pose_index}: {e}"));
            }
        }
    }

    fn tick_advancing(&mut self) {
        self.session.current_pose_index += 1;
        if self.session.current_pose_index >= self.poses.len() {
            info!(captures = self.poses.len(), "pose list exhausted, session complete");
            self.camera.release();
            if let Err(e) = self.gimbal.stop() {
                warn!("failed to rest actuators at completion: {e}");
            }
            self.transition(SequencerState::Complete);
            return;
        }
        if self.session.auto_capture_enabled {
            // Re-armed from completion time, so slow saves never compress
            // the gap to the next capture.
            self.session.next_capture_deadline =
                Some(self.clock.now() + self.session.auto_interval);
        }
        self.transition(SequencerState::Tracking);
    }

    pub fn handle_command(&mut self, command: Command) {
        debug!(state = %self.state, ?command, "operator command");
        match command {
            Command::StartSession => {
                if self.state != SequencerState::Idle {
                    warn!(state = %self.state, "start ignored outside idle");
                    return;
                }
                self.cancel.clear();
                self.session =
                    CaptureSession::new(Duration::from_secs(self.config.auto_interval_secs));
                if self.mode == SessionMode::TimedAuto {
                    self.session.auto_capture_enabled = true;
                    self.session.next_capture_deadline =
                        Some(self.clock.now() + self.session.auto_interval);
                }
                self.transition(SequencerState::Tracking);
            }

            Command::ManualCapture => match self.state {
                SequencerState::Tracking => self.transition(SequencerState::MovingToPosition),
                // In the error state a manual capture doubles as retry:
                // resume at save if a frame is staged, otherwise go back
                // to live view.
                SequencerState::Error => {
                    self.last_error = None;
                    if self.pending_frame.is_some() {
                        self.transition(SequencerState::Saving);
                    } else {
                        self.transition(SequencerState::Tracking);
                    }
                }
                _ => warn!(state = %self.state, "manual capture ignored"),
            },

            Command::ToggleAutoCapture { interval } => {
                self.session.auto_capture_enabled = !self.session.auto_capture_enabled;
                self.session.auto_interval = interval;
                if self.session.auto_capture_enabled {
                    self.session.next_capture_deadline = Some(self.clock.now() + interval);
                } else {
                    self.session.next_capture_deadline = None;
                }
                if self.state == SequencerState::Tracking {
                    self.tracking_loop_active = self.mode == SessionMode::TrackingAssisted
                        && !self.session.auto_capture_enabled;
                }
                info!(
                    enabled = self.session.auto_capture_enabled,
                    interval_secs = interval.as_secs(),
                    "auto-capture toggled"
                );
            }

            Command::PrevPose => self.navigate(-1),
            Command::NextPose => self.navigate(1),

            Command::JogFine { axis, delta_deg } => {
                if !self.navigation_allowed() {
                    return;
                }
                if let Err(e) = self.gimbal.axis_mut(axis).jog_fine(delta_deg) {
                    self.fault(format!("{axis} fine jog failed: {e}"));
                }
            }

            Command::JogCoarse { axis, delta_steps } => {
                if !self.navigation_allowed() {
                    return;
                }
                let delay = Duration::from_millis(self.config.move_step_delay_ms);
                if let Err(e) =
                    self.gimbal
                        .axis_mut(axis)
                        .jog_coarse(delta_steps, delay, &self.cancel)
                {
                    self.fault(format!("{axis} coarse jog failed: {e}"));
                }
            }

            Command::Reset => {
                self.cancel.cancel();
                self.pending_frame = None;
                self.last_error = None;
                let interval = self.session.auto_interval;
                self.session = CaptureSession::new(interval);
                if let Err(e) = self.gimbal.stop() {
                    warn!("failed to rest actuators on reset: {e}");
                }
                self.transition(SequencerState::Idle);
                self.cancel.clear();
            }

            Command::Shutdown => {
                self.cancel.cancel();
                if let Err(e) = self.gimbal.stop() {
                    warn!("failed to rest actuators on shutdown: {e}");
                }
                self.camera.release();
                self.shutdown = true;
                info!("sequencer shut down");
            }
        }
    }

    /// Pose navigation and jogs are only safe when no capture work is in
    /// flight.
    fn navigation_allowed(&self) -> bool {
        matches!(
            self.state,
            SequencerState::Idle | SequencerState::Tracking
        )
    }

    fn navigate(&mut self, delta: i64) {
        if !self.navigation_allowed() {
            warn!(state = %self.state, "pose navigation ignored");
            return;
        }
        let last = self.poses.len() as i64 - 1;
        let index = (self.session.current_pose_index as i64 + delta).clamp(0, last);
        self.session.current_pose_index = index as usize;
        debug!(pose = self.session.current_pose_index, "pose selected");
        if let Err(e) = self.gimbal.center() {
            self.fault(format!("re-center failed: {e}"));
        }
    }

    /// Command-and-tick loop. Returns when a shutdown command arrives or
    /// every sender of the command channel is gone.
    pub fn run(&mut self) {
        info!(mode = ?self.mode, poses = self.poses.len(), "sequencer running");
        while !self.shutdown {
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
                if self.shutdown {
                    return;
                }
            }
            match self.state {
                SequencerState::Idle | SequencerState::Complete | SequencerState::Error => {
                    match self.commands.recv_timeout(WAIT_SLICE) {
                        Ok(command) => self.handle_command(command),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                _ => self.tick(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticCamera;
    use crate::locator::CentroidLocator;
    use crate::store::StoreError;
    use hardware::gpio::{HardwareContext, MockBackend};
    use shared::clock::ManualClock;
    use shared::config::RigConfig;

    struct MemoryStore {
        saved: Vec<usize>,
    }

    impl CaptureStore for MemoryStore {
        fn save(&mut self, pose_index: usize, _frame: &Frame) -> Result<String, StoreError> {
            self.saved.push(pose_index);
            Ok(format!("mem{pose_index:02}"))
        }
    }

    fn test_config() -> RigConfig {
        RigConfig::from_json(
            r#"{
                "pan":  { "servo": 5, "dir": 13, "step": 19, "enable": 12, "mode": [16, 17, 20], "microstep": "eighth" },
                "tilt": { "servo": 6, "dir": 24, "step": 18, "enable": 4,  "mode": [21, 22, 27], "microstep": "eighth" },
                "servo": { "settle_ms": 0 },
                "tracking": { "coarse_step_delay_ms": 0, "fine_step_delay_ms": 0 },
                "sequence": { "move_step_delay_ms": 0, "stabilize_ms": 30 },
                "poses": [
                    { "index": 0, "fine_pan": 90.0, "fine_tilt": 160.0 },
                    { "index": 1, "fine_pan": 105.0, "fine_tilt": 80.0 },
                    { "index": 2, "fine_pan": 70.0, "fine_tilt": 120.0 }
                ]
            }"#,
        )
        .unwrap()
    }

    fn sequencer(
        mut config: RigConfig,
        mode: SessionMode,
    ) -> CaptureSequencer<SyntheticCamera, MemoryStore, CentroidLocator> {
        config.sequence.mode = mode;
        let mut ctx = HardwareContext::new(Box::new(MockBackend::new()));
        let gimbal = Gimbal::from_config(&config, &mut ctx).unwrap();
        CaptureSequencer::new(
            gimbal,
            SyntheticCamera::new(128, 128),
            MemoryStore { saved: Vec::new() },
            CentroidLocator::default(),
            config.poses.clone(),
            config.sequence.clone(),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn starts_only_from_idle() {
        let mut seq = sequencer(test_config(), SessionMode::ManualOnly);
        seq.handle_command(Command::StartSession);
        assert_eq!(seq.state(), SequencerState::Tracking);
        seq.handle_command(Command::ManualCapture);
        assert_eq!(seq.state(), SequencerState::MovingToPosition);
        seq.handle_command(Command::StartSession);
        assert_eq!(seq.state(), SequencerState::MovingToPosition);
    }

    #[test]
    fn manual_capture_walks_the_chain() {
        let mut seq = sequencer(test_config(), SessionMode::ManualOnly);
        seq.handle_command(Command::StartSession);
        seq.handle_command(Command::ManualCapture);
        for expected in [
            SequencerState::Stabilizing,
            SequencerState::Capturing,
            SequencerState::Saving,
            SequencerState::Advancing,
            SequencerState::Tracking,
        ] {
            seq.tick();
            assert_eq!(seq.state(), expected);
        }
        assert_eq!(seq.session().current_pose_index, 1);
        assert_eq!(seq.store.saved, vec![0]);
    }

    #[test]
    fn pose_navigation_clamps_at_the_ends() {
        let mut seq = sequencer(test_config(), SessionMode::ManualOnly);
        seq.handle_command(Command::PrevPose);
        assert_eq!(seq.session().current_pose_index, 0);
        seq.handle_command(Command::NextPose);
        seq.handle_command(Command::NextPose);
        seq.handle_command(Command::NextPose);
        assert_eq!(seq.session().current_pose_index, 2);
    }

    #[test]
    fn toggle_arms_and_disarms_the_deadline() {
        let mut seq = sequencer(test_config(), SessionMode::ManualOnly);
        seq.handle_command(Command::StartSession);
        seq.handle_command(Command::ToggleAutoCapture {
            interval: Duration::from_secs(7),
        });
        assert!(seq.session().auto_capture_enabled);
        assert_eq!(
            seq.session().next_capture_deadline,
            Some(Duration::from_secs(7))
        );
        seq.handle_command(Command::ToggleAutoCapture {
            interval: Duration::from_secs(7),
        });
        assert!(!seq.session().auto_capture_enabled);
        assert_eq!(seq.session().next_capture_deadline, None);
    }

    #[test]
    fn timed_auto_session_arms_on_start() {
        let mut seq = sequencer(test_config(), SessionMode::TimedAuto);
        seq.handle_command(Command::StartSession);
        assert!(seq.session().auto_capture_enabled);
        assert!(seq.session().next_capture_deadline.is_some());
        // Corrections never run while the timer owns the actuators.
        assert!(!seq.transitions().last().unwrap().tracking_active);
    }

    #[test]
    fn reset_returns_to_idle_and_clears_session() {
        let mut seq = sequencer(test_config(), SessionMode::ManualOnly);
        seq.handle_command(Command::StartSession);
        seq.handle_command(Command::ManualCapture);
        seq.tick();
        assert_eq!(seq.state(), SequencerState::Stabilizing);
        seq.handle_command(Command::Reset);
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.session().current_pose_index, 0);
        assert!(!seq.cancel_handle().is_cancelled());
    }
}
