//! Capture store boundary.
//!
//! Persisting images and session metadata belongs to an external system;
//! the sequencer only hands over a frame plus its pose index and receives
//! an opaque identifier. Failures are surfaced to the operator, never
//! retried automatically. The [`DirectoryStore`] writes PNG files into a
//! directory and serves as the default collaborator.

use std::path::PathBuf;

use chrono::Local;
use thiserror::Error;
use tracing::info;

use shared::types::Frame;

/// Capture persistence failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write capture: {0}")]
    Write(String),
}

/// Sink for captured frames.
pub trait CaptureStore: Send {
    /// Persist a frame for the given pose. Returns an opaque,
    /// externally-unique identifier.
    fn save(&mut self, pose_index: usize, frame: &Frame) -> Result<String, StoreError>;
}

/// Directory-backed capture store.
///
/// Identifiers follow `pose<NN>_<timestamp>_<letter>`, with the letter
/// advancing per save so back-to-back captures in the same second stay
/// distinct.
pub struct DirectoryStore {
    directory: PathBuf,
    sequence: u32,
}

impl DirectoryStore {
    /// Create a store rooted at `directory`, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(Self {
            directory,
            sequence: 0,
        })
    }

    fn next_identifier(&mut self, pose_index: usize) -> String {
        let letter = (b'A' + (self.sequence % 26) as u8) as char;
        self.sequence += 1;
        let timestamp = Local::now().format("%Y%m%d%H%M%S");
        format!("pose{pose_index:02}_{timestamp}_{letter}")
    }
}

impl CaptureStore for DirectoryStore {
    fn save(&mut self, pose_index: usize, frame: &Frame) -> Result<String, StoreError> {
        let identifier = self.next_identifier(pose_index);
        let path = self.directory.join(format!("{identifier}.png"));

        let buffer = image::GrayImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or_else(|| StoreError::Write("frame buffer has wrong length".to_string()))?;
        buffer
            .save(&path)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        info!(pose = pose_index, path = %path.display(), "capture saved");
        Ok(identifier)
    }
}
