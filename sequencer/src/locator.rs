//! Vision target locator boundary.
//!
//! The sequencer does not care how a target is found; it consumes
//! pixel-space offsets from the frame center. `None` means "no target in
//! this frame" and is not an error. The [`CentroidLocator`] is a minimal
//! built-in: an intensity-weighted centroid over pixels above a
//! threshold.

use shared::types::{Frame, TrackingOffset};

/// Turns frames into target offsets.
pub trait TargetLocator: Send {
    fn detect(&mut self, frame: &Frame) -> Option<TrackingOffset>;
}

/// Brightness-centroid target locator.
///
/// Averages the coordinates of all pixels at or above `threshold`,
/// weighted by intensity. Offsets whose magnitude falls inside
/// `fine_window_px` are flagged fine-tune: the target is nearly centered
/// and corrections should be gentle.
#[derive(Debug, Clone)]
pub struct CentroidLocator {
    pub threshold: u8,
    /// Minimum number of qualifying pixels before a detection counts.
    pub min_pixels: usize,
    pub fine_window_px: i32,
}

impl Default for CentroidLocator {
    fn default() -> Self {
        Self {
            threshold: 128,
            min_pixels: 12,
            fine_window_px: 40,
        }
    }
}

impl TargetLocator for CentroidLocator {
    fn detect(&mut self, frame: &Frame) -> Option<TrackingOffset> {
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut total_weight = 0.0f64;
        let mut count = 0usize;

        for y in 0..frame.height {
            let row = (y * frame.width) as usize;
            for x in 0..frame.width {
                let value = frame.pixels[row + x as usize];
                if value >= self.threshold {
                    let weight = value as f64;
                    sum_x += x as f64 * weight;
                    sum_y += y as f64 * weight;
                    total_weight += weight;
                    count += 1;
                }
            }
        }

        if count < self.min_pixels {
            return None;
        }

        let (center_x, center_y) = frame.center();
        let dx = (sum_x / total_weight).round() as i32 - center_x;
        let dy = (sum_y / total_weight).round() as i32 - center_y;
        let fine_tune = dx.abs() <= self.fine_window_px && dy.abs() <= self.fine_window_px;
        Some(TrackingOffset { dx, dy, fine_tune })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FrameSource, SyntheticCamera};
    use std::time::Duration;

    fn frame_with_target(x: i32, y: i32) -> Frame {
        let mut camera = SyntheticCamera::new(128, 128);
        camera.set_target(x, y);
        camera.grab_frame(Duration::from_millis(10)).unwrap()
    }

    #[test]
    fn centered_target_yields_zero_offset() {
        let mut locator = CentroidLocator::default();
        let offset = locator.detect(&frame_with_target(64, 64)).unwrap();
        assert_eq!(offset.dx, 0);
        assert_eq!(offset.dy, 0);
        assert!(offset.fine_tune);
    }

    #[test]
    fn offset_points_at_the_target() {
        let mut locator = CentroidLocator::default();
        let offset = locator.detect(&frame_with_target(100, 30)).unwrap();
        assert_eq!(offset.dx, 36);
        assert_eq!(offset.dy, -34);
    }

    #[test]
    fn large_offsets_are_not_fine_tune() {
        let mut locator = CentroidLocator::default();
        let offset = locator.detect(&frame_with_target(110, 64)).unwrap();
        assert!(offset.dx > 40);
        assert!(!offset.fine_tune);
    }

    #[test]
    fn blank_frame_is_no_target() {
        let mut locator = CentroidLocator::default();
        let blank = Frame::new(64, 64, vec![10; 64 * 64]);
        assert!(locator.detect(&blank).is_none());
    }
}
