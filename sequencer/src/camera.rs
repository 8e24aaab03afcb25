//! Camera boundary.
//!
//! The real camera lives outside this system; the sequencer only needs
//! "give me one frame within a timeout". The [`SyntheticCamera`] produces
//! deterministic test-pattern frames with a bright target blob, which is
//! enough to exercise tracking and capture end to end without hardware.

use std::time::Duration;

use thiserror::Error;

use shared::types::Frame;

/// Frame acquisition failure.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("timed out after {0:?} waiting for a frame")]
    Timeout(Duration),

    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Source of camera frames.
pub trait FrameSource: Send {
    /// Acquire one frame, waiting at most `timeout`.
    fn grab_frame(&mut self, timeout: Duration) -> Result<Frame, FrameError>;

    /// Release the device. Called once when a session completes or the
    /// system shuts down; further grabs are not expected to succeed.
    fn release(&mut self) {}
}

/// Deterministic test-pattern camera.
///
/// Frames carry a faint gradient background and a bright square target
/// whose position is settable, so a locator sees a consistent offset.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    target_x: i32,
    target_y: i32,
    target_half_size: i32,
    released: bool,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            target_x: (width / 2) as i32,
            target_y: (height / 2) as i32,
            target_half_size: 6,
            released: false,
        }
    }

    /// Place the target blob in pixel coordinates.
    pub fn set_target(&mut self, x: i32, y: i32) {
        self.target_x = x;
        self.target_y = y;
    }

    fn render(&self) -> Frame {
        let mut pixels = vec![0u8; (self.width * self.height) as usize];
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                // Faint gradient keeps the background below any sane
                // detection threshold.
                let background = ((x + y) % 32) as u8;
                let inside = (x - self.target_x).abs() <= self.target_half_size
                    && (y - self.target_y).abs() <= self.target_half_size;
                let value = if inside { 240 } else { background };
                pixels[(y as u32 * self.width + x as u32) as usize] = value;
            }
        }
        Frame::new(self.width, self.height, pixels)
    }
}

impl FrameSource for SyntheticCamera {
    fn grab_frame(&mut self, _timeout: Duration) -> Result<Frame, FrameError> {
        if self.released {
            return Err(FrameError::Unavailable("camera released".to_string()));
        }
        Ok(self.render())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_the_requested_geometry() {
        let mut camera = SyntheticCamera::new(64, 48);
        let frame = camera.grab_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.pixels.len(), 64 * 48);
    }

    #[test]
    fn target_blob_is_bright_at_its_position() {
        let mut camera = SyntheticCamera::new(64, 64);
        camera.set_target(20, 40);
        let frame = camera.grab_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.pixels[(40 * 64 + 20) as usize], 240);
        assert!(frame.pixels[(5 * 64 + 5) as usize] < 32);
    }

    #[test]
    fn released_camera_refuses_frames() {
        let mut camera = SyntheticCamera::new(32, 32);
        camera.release();
        assert!(matches!(
            camera.grab_frame(Duration::from_millis(10)),
            Err(FrameError::Unavailable(_))
        ));
    }
}
