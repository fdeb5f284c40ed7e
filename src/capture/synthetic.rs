use super::CaptureSource;
use crate::segmentation::Resolution;
use anyhow::Result;
use image::{Rgb, RgbImage};

const BACKDROP: Rgb<u8> = Rgb([200, 200, 200]);
const SUBJECT: Rgb<u8> = Rgb([40, 30, 30]);

/// Camera stand-in: a dark square sweeping back and forth over a light
/// backdrop.
///
/// Useful for running the stream without hardware. The pattern is fully
/// determined by the frame number.
pub struct SyntheticCapture {
    resolution: Resolution,
    frame: u64,
    limit: Option<u64>,
    side: u32,
    step: u32,
}

impl SyntheticCapture {
    /// `limit` caps the number of frames; `None` never ends.
    pub fn new(resolution: Resolution, limit: Option<u64>) -> Self {
        let side = (resolution.width.min(resolution.height) / 4).max(1);
        Self {
            resolution,
            frame: 0,
            limit,
            side,
            step: (resolution.width / 64).max(1),
        }
    }

    /// Left edge of the square for a frame number.
    fn offset(&self, frame: u64) -> u32 {
        let travel = u64::from(self.resolution.width.saturating_sub(self.side).max(1));
        let position = (frame * u64::from(self.step)) % (2 * travel);
        let position = if position < travel {
            position
        } else {
            2 * travel - position
        };
        position as u32
    }

    pub fn render(&self, frame: u64) -> RgbImage {
        let left = self.offset(frame);
        let top = self.resolution.height.saturating_sub(self.side) / 2;
        RgbImage::from_fn(self.resolution.width, self.resolution.height, |x, y| {
            if (left..left + self.side).contains(&x) && (top..top + self.side).contains(&y) {
                SUBJECT
            } else {
                BACKDROP
            }
        })
    }
}

impl CaptureSource for SyntheticCapture {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.limit.is_some_and(|limit| self.frame >= limit) {
            return Ok(None);
        }
        let image = self.render(self.frame);
        self.frame += 1;
        Ok(Some(image))
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_source_ends() {
        let mut source = SyntheticCapture::new(Resolution::new(64, 48), Some(3));
        for _ in 0..3 {
            assert!(source.capture_frame().unwrap().is_some());
        }
        assert!(source.capture_frame().unwrap().is_none());
    }

    #[test]
    fn square_moves_between_frames() {
        let source = SyntheticCapture::new(Resolution::new(64, 48), None);
        let first = source.render(0);
        let later = source.render(5);

        assert_eq!(first.dimensions(), (64, 48));
        assert_ne!(first, later);
        assert_eq!(source.render(5), later);
        assert_eq!(*first.get_pixel(0, 24), SUBJECT);
        assert_eq!(*first.get_pixel(63, 24), BACKDROP);
    }

    #[test]
    fn square_stays_inside_the_frame() {
        let source = SyntheticCapture::new(Resolution::new(64, 48), None);
        for frame in 0..200 {
            let offset = source.offset(frame);
            assert!(offset + source.side <= 64, "frame {frame} offset {offset}");
        }
    }
}
