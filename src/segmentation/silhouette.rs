use image::{GrayImage, Rgb, RgbImage};

use super::types::{BinaryMask, Resolution};

const SUBJECT: Rgb<u8> = Rgb([0, 0, 0]);
const BACKDROP: Rgb<u8> = Rgb([255, 255, 255]);

/// Static intensity threshold that separates a dark subject from a light
/// scene. Keeps no history.
#[derive(Debug, Clone, Copy)]
pub struct SilhouetteExtractor {
    threshold: u8,
}

impl Default for SilhouetteExtractor {
    fn default() -> Self {
        Self::new(80)
    }
}

impl SilhouetteExtractor {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// Returns the subject mask (pixels darker than the threshold) and the
    /// base visualization: subject black, everything else white.
    pub fn extract(&self, gray: &GrayImage) -> (BinaryMask, RgbImage) {
        let _span = tracing::debug_span!("silhouette").entered();

        let mask = BinaryMask::from_fn(Resolution::of(gray), |x, y| {
            gray.get_pixel(x, y)[0] < self.threshold
        });
        let base = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            if mask.is_set(x, y) {
                SUBJECT
            } else {
                BACKDROP
            }
        });

        (mask, base)
    }
}
