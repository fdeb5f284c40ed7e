use super::CaptureSource;
use crate::segmentation::Resolution;
use anyhow::{Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    /// Native size the camera negotiated; frames arrive at this size.
    resolution: Resolution,
}

impl WebcamCapture {
    pub fn new(device_index: u32, resolution: Resolution) -> Result<Self> {
        tracing::info!("Initializing webcam {} for {} output", device_index, resolution);

        let index = CameraIndex::Index(device_index);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let native = camera.resolution();
        let native = Resolution::new(native.width(), native.height());
        tracing::info!("Webcam streaming at {}, target {}", native, resolution);

        Ok(Self {
            camera,
            resolution: native,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame = self.camera.frame().context("Failed to capture frame")?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        Ok(Some(decoded))
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {err}");
        } else {
            tracing::info!("Webcam stream closed");
        }
    }
}
