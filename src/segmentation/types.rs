use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use image::{GrayImage, Luma};

use crate::error::VisionError;

const ON: u8 = 255;
const OFF: u8 = 0;

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = w.trim().parse().context("invalid width")?;
        let height: u32 = h.trim().parse().context("invalid height")?;
        if width == 0 || height == 0 {
            return Err(anyhow!("resolution must be non-zero, got {s:?}"));
        }
        Ok(Self { width, height })
    }
}

/// Single-channel mask whose pixels are always exactly 0 or 255.
///
/// There is no way to write an intermediate value into a mask: every
/// constructor decides each pixel with a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    image: GrayImage,
}

/// Structural boundary pixels of a silhouette.
pub type EdgeMap = BinaryMask;

impl BinaryMask {
    /// An all-background mask.
    pub fn empty(resolution: Resolution) -> Self {
        Self {
            image: GrayImage::new(resolution.width, resolution.height),
        }
    }

    pub fn from_fn<F>(resolution: Resolution, mut set: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let image = GrayImage::from_fn(resolution.width, resolution.height, |x, y| {
            Luma([if set(x, y) { ON } else { OFF }])
        });
        Self { image }
    }

    /// Pixels strictly above `threshold` become 255, the rest 0.
    pub fn binarize(gray: &GrayImage, threshold: u8) -> Self {
        let (width, height) = gray.dimensions();
        Self::from_fn(Resolution::new(width, height), |x, y| {
            gray.get_pixel(x, y)[0] > threshold
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::of(&self.image)
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] == ON
    }

    /// Number of foreground pixels.
    pub fn count(&self) -> usize {
        self.image.as_raw().iter().filter(|&&v| v == ON).count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Pixel-wise logical AND of two masks of the same size.
    pub fn and(&self, other: &BinaryMask) -> Result<BinaryMask, VisionError> {
        VisionError::check("mask intersection", self.resolution(), other.resolution())?;
        Ok(Self::from_fn(self.resolution(), |x, y| {
            self.is_set(x, y) && other.is_set(x, y)
        }))
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }
}

/// Trait for background subtraction models
/// Allows swapping the per-pixel scene model without touching the pipeline
pub trait BackgroundSubtractor {
    /// Classify a grayscale frame into foreground (255) and background (0)
    /// and fold the frame into the model.
    ///
    /// A frame whose size differs from the model's is rejected and leaves the
    /// model untouched.
    fn classify(&mut self, frame: &GrayImage) -> Result<BinaryMask, VisionError>;

    /// Forget everything learned so far
    fn reset_state(&mut self);

    /// Resolution the model was built for
    fn resolution(&self) -> Resolution;
}
