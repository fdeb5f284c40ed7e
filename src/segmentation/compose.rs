use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use image::{Rgb, RgbImage};

use super::types::{BinaryMask, EdgeMap, Resolution};
use crate::error::VisionError;

/// Colour painted over moving edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightColor(pub Rgb<u8>);

impl Default for HighlightColor {
    fn default() -> Self {
        Self(Rgb([255, 0, 0]))
    }
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0 .0;
        write!(f, "{r},{g},{b}")
    }
}

/// Accepts `R,G,B` or `#rrggbb`.
impl FromStr for HighlightColor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(anyhow!("expected #rrggbb, got {s:?}"));
            }
            let channel = |range: std::ops::Range<usize>| {
                hex.get(range)
                    .ok_or_else(|| anyhow!("expected #rrggbb, got {s:?}"))
                    .and_then(|c| u8::from_str_radix(c, 16).context("invalid hex colour"))
            };
            return Ok(Self(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?])));
        }

        let channels = s
            .split(',')
            .map(|c| c.trim().parse::<u8>().context("invalid colour channel"))
            .collect::<anyhow::Result<Vec<u8>>>()?;
        match channels.as_slice() {
            &[r, g, b] => Ok(Self(Rgb([r, g, b]))),
            _ => Err(anyhow!("expected R,G,B, got {s:?}")),
        }
    }
}

/// Paints edges that coincide with motion onto the silhouette image.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionCompositor {
    highlight: HighlightColor,
}

impl MotionCompositor {
    pub fn new(highlight: HighlightColor) -> Self {
        Self { highlight }
    }

    /// Edge pixels that are also foreground in the motion mask.
    pub fn moving_edges(edges: &EdgeMap, motion: &BinaryMask) -> Result<BinaryMask, VisionError> {
        edges.and(motion)
    }

    /// Overwrites every moving-edge pixel of `base` with the highlight colour.
    ///
    /// Returns the final image together with the moving-edges mask.
    pub fn compose(
        &self,
        edges: &EdgeMap,
        motion: &BinaryMask,
        mut base: RgbImage,
    ) -> Result<(RgbImage, BinaryMask), VisionError> {
        let _span = tracing::debug_span!("compose").entered();

        let moving = Self::moving_edges(edges, motion)?;
        VisionError::check("compositor", moving.resolution(), Resolution::of(&base))?;

        for (x, y, pixel) in base.enumerate_pixels_mut() {
            if moving.is_set(x, y) {
                *pixel = self.highlight.0;
            }
        }

        Ok((base, moving))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    #[test]
    fn parses_colours() {
        assert_eq!("255,0,0".parse::<HighlightColor>().unwrap(), HighlightColor::default());
        assert_eq!(
            "#00ff80".parse::<HighlightColor>().unwrap(),
            HighlightColor(Rgb([0, 255, 128]))
        );
        assert!("1,2".parse::<HighlightColor>().is_err());
        assert!("#fff".parse::<HighlightColor>().is_err());
        assert!("300,0,0".parse::<HighlightColor>().is_err());
        assert_eq!(HighlightColor::default().to_string(), "255,0,0");
    }

    #[test]
    fn moving_edges_are_a_subset_of_both_inputs() {
        let r = Resolution::new(20, 20);
        let edges = BinaryMask::from_fn(r, |x, y| (x + y) % 3 == 0);
        let motion = BinaryMask::from_fn(r, |x, y| x > 5 && y < 15);
        let moving = MotionCompositor::moving_edges(&edges, &motion).unwrap();

        for y in 0..20 {
            for x in 0..20 {
                if moving.is_set(x, y) {
                    assert!(edges.is_set(x, y) && motion.is_set(x, y));
                }
            }
        }
        assert!(!moving.is_empty());
    }

    #[test]
    fn no_motion_leaves_base_untouched() {
        let r = Resolution::new(16, 16);
        let edges = BinaryMask::from_fn(r, |x, _| x == 4);
        let base = RgbImage::from_pixel(16, 16, WHITE);

        let (out, moving) = MotionCompositor::default()
            .compose(&edges, &BinaryMask::empty(r), base.clone())
            .unwrap();
        assert!(moving.is_empty());
        assert_eq!(out, base);
    }

    #[test]
    fn only_moving_edges_turn_red() {
        let r = Resolution::new(16, 16);
        let edges = BinaryMask::from_fn(r, |x, _| x == 4 || x == 12);
        let motion = BinaryMask::from_fn(r, |x, _| x < 8);
        let base = RgbImage::from_pixel(16, 16, WHITE);

        let (out, _) = MotionCompositor::default().compose(&edges, &motion, base).unwrap();
        assert_eq!(*out.get_pixel(4, 7), RED);
        assert_eq!(*out.get_pixel(12, 7), WHITE);
        assert_eq!(out.pixels().filter(|p| **p == RED).count(), 16);
    }

    #[test]
    fn base_of_another_size_is_rejected() {
        let r = Resolution::new(8, 8);
        let result = MotionCompositor::default().compose(
            &BinaryMask::empty(r),
            &BinaryMask::empty(r),
            RgbImage::new(8, 9),
        );
        assert!(matches!(result, Err(VisionError::ResolutionMismatch { .. })));
    }
}
