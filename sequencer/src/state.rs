//! Sequencer states, session bookkeeping and operator commands.

use std::fmt;
use std::time::Duration;

use shared::types::AxisId;

/// Capture sequencer state.
///
/// Exactly one instance exists per session and transitions are the only
/// permitted mutation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Waiting for a session to start. Pose index is zero here.
    Idle,
    /// Live view. Tracking corrections run here in tracking-assisted
    /// mode; auto-capture deadlines fire from here.
    Tracking,
    /// Driving both axes to the current preset pose.
    MovingToPosition,
    /// Letting the mechanics settle before the frame is taken.
    Stabilizing,
    /// Requesting one frame from the camera.
    Capturing,
    /// Handing the frame to the capture store.
    Saving,
    /// Bumping the pose index and re-arming the schedule.
    Advancing,
    /// All poses captured; actuators stopped, camera released.
    Complete,
    /// A fault was surfaced; waiting for operator reset or retry.
    Error,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequencerState::Idle => "idle",
            SequencerState::Tracking => "tracking",
            SequencerState::MovingToPosition => "moving-to-position",
            SequencerState::Stabilizing => "stabilizing",
            SequencerState::Capturing => "capturing",
            SequencerState::Saving => "saving",
            SequencerState::Advancing => "advancing",
            SequencerState::Complete => "complete",
            SequencerState::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Mutable per-session bookkeeping.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub current_pose_index: usize,
    pub auto_capture_enabled: bool,
    /// Absolute deadline (against the sequencer clock) for the next
    /// auto capture. Always re-armed from completion time, never from
    /// session start.
    pub next_capture_deadline: Option<Duration>,
    pub auto_interval: Duration,
}

impl CaptureSession {
    pub fn new(auto_interval: Duration) -> Self {
        Self {
            current_pose_index: 0,
            auto_capture_enabled: false,
            next_capture_deadline: None,
            auto_interval,
        }
    }
}

/// One recorded state transition, for diagnostics and invariant checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SequencerState,
    pub to: SequencerState,
    pub at: Duration,
    /// Whether the tracking correction loop was active at the moment the
    /// destination state was entered.
    pub tracking_active: bool,
}

/// Operator commands, enqueued by the interactive layer.
///
/// The interactive layer never blocks on hardware timing; it only sends
/// these and observes [`SequencerEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    StartSession,
    ManualCapture,
    ToggleAutoCapture { interval: Duration },
    PrevPose,
    NextPose,
    JogFine { axis: AxisId, delta_deg: f64 },
    JogCoarse { axis: AxisId, delta_steps: i64 },
    Reset,
    Shutdown,
}

/// Notifications published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    StateChanged {
        from: SequencerState,
        to: SequencerState,
    },
    /// Visible countdown tick during auto-mode stabilization.
    Countdown(u32),
    CaptureSaved {
        pose_index: usize,
        identifier: String,
    },
    Fault(String),
}
