use image::{imageops, GrayImage, Luma, RgbImage};

use super::types::Resolution;

/// Preprocessor for bringing camera frames to the pipeline's working format
pub struct Preprocessor {
    target: Resolution,
}

impl Preprocessor {
    pub fn new(target: Resolution) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Resolution {
        self.target
    }

    /// Preprocess an RGB frame into a grayscale frame at the target size
    ///
    /// Steps:
    /// 1. Resize to target dimensions (bilinear)
    /// 2. Convert to luma with BT.601 weights
    pub fn preprocess(&self, image: &RgbImage) -> GrayImage {
        let _span = tracing::debug_span!("preprocess").entered();

        if Resolution::of(image) == self.target {
            to_luma(image)
        } else {
            let resized = imageops::resize(
                image,
                self.target.width,
                self.target.height,
                imageops::FilterType::Triangle,
            );
            to_luma(&resized)
        }
    }
}

/// Convert RGB to single-channel luma
///
/// Uses the BT.601 weights (0.299, 0.587, 0.114) in 14-bit fixed point,
/// rounded to nearest.
pub fn to_luma(image: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let y = (u32::from(r) * R + u32::from(g) * G + u32::from(b) * B + (1 << (SHIFT - 1))) >> SHIFT;
        Luma([y.min(255) as u8])
    })
}
