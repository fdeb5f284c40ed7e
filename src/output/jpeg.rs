use super::FrameEncoder;
use anyhow::{Context, Result};
use bytes::Bytes;
use image::codecs::jpeg;
use image::RgbImage;

pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    #[cfg(test)]
    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, frame: &RgbImage) -> Result<Bytes> {
        let _span = tracing::debug_span!("jpeg_encode", quality = self.quality).entered();

        let mut buffer = Vec::with_capacity(frame.as_raw().len() / 8);
        jpeg::JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(frame)
            .context("Failed to encode JPEG")?;

        Ok(Bytes::from(buffer))
    }
}
