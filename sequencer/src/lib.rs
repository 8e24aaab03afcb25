//! Capture sequencing for the pan/tilt rig.
//!
//! The [`CaptureSequencer`] owns the gimbal and drives the ordered pose
//! list through a single state machine covering manual, tracking-assisted
//! and timed-auto capture. Cameras, capture stores and target locators
//! are collaborators behind traits; this crate ships a synthetic
//! test-pattern camera, a directory-backed store and a brightness
//! centroid locator so the whole stack runs without external services.

pub mod camera;
pub mod locator;
pub mod sequencer;
pub mod state;
pub mod store;

pub use camera::{FrameError, FrameSource, SyntheticCamera};
pub use locator::{CentroidLocator, TargetLocator};
pub use sequencer::CaptureSequencer;
pub use state::{CaptureSession, Command, SequencerEvent, SequencerState, Transition};
pub use store::{CaptureStore, DirectoryStore, StoreError};
