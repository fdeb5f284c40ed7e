mod jpeg;
mod mjpeg;
mod server;

pub use jpeg::JpegEncoder;
pub use mjpeg::{FramePacket, MjpegPublisher};
pub use server::serve;

use anyhow::Result;
use bytes::Bytes;
use image::RgbImage;

/// Trait for turning composited frames into transportable bytes
pub trait FrameEncoder {
    fn encode(&mut self, frame: &RgbImage) -> Result<Bytes>;
}

/// Trait for output destinations
pub trait OutputSink {
    /// Hand an encoded frame to whoever is watching
    fn publish(&mut self, packet: FramePacket);
}
