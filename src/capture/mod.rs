mod synthetic;
mod v4l_capture;

pub use synthetic::SyntheticCapture;
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

use crate::segmentation::Resolution;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame
    ///
    /// `Ok(None)` means the source has no more frames. Errors are treated as
    /// transient: the caller may simply ask again.
    fn capture_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> Resolution;
}
