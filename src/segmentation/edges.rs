use image::GrayImage;

use super::types::{BinaryMask, EdgeMap, Resolution};

/// tan(22.5°) in Q15 fixed point, the sector boundary for gradient directions.
const TAN_22_5_Q15: i64 = 13573;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Rejected,
    Candidate,
    Edge,
}

/// Two-threshold gradient edge detector (Canny) with hysteresis linking.
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetector {
    low: i32,
    high: i32,
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new(50, 150)
    }
}

impl EdgeDetector {
    pub fn new(low: u16, high: u16) -> Self {
        let (low, high) = if low > high { (high, low) } else { (low, high) };
        Self {
            low: i32::from(low),
            high: i32::from(high),
        }
    }

    pub fn thresholds(&self) -> (i32, i32) {
        (self.low, self.high)
    }

    /// Outline of the silhouette mask.
    pub fn detect(&self, silhouette: &BinaryMask) -> EdgeMap {
        self.detect_gray(silhouette.as_image())
    }

    /// Edges of an arbitrary grayscale image.
    ///
    /// A pixel is kept when its gradient magnitude (L1 norm of the 3x3 Sobel
    /// derivatives) is a local maximum across the edge direction and it either
    /// clears the high threshold or is 8-connected, through pixels clearing the
    /// low threshold, to one that does.
    pub fn detect_gray(&self, gray: &GrayImage) -> EdgeMap {
        let _span = tracing::debug_span!("canny").entered();

        let resolution = Resolution::of(gray);
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        if width == 0 || height == 0 {
            return BinaryMask::empty(resolution);
        }

        let gradients = Gradients::sobel(gray);
        let mut labels = vec![Label::Rejected; width * height];
        let mut stack = Vec::new();

        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                let m = gradients.mag[i];
                if m <= self.low || !gradients.is_local_max(x, y) {
                    continue;
                }
                if m > self.high {
                    labels[i] = Label::Edge;
                    stack.push((x, y));
                } else {
                    labels[i] = Label::Candidate;
                }
            }
        }

        while let Some((x, y)) = stack.pop() {
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let j = ny * width + nx;
                    if labels[j] == Label::Candidate {
                        labels[j] = Label::Edge;
                        stack.push((nx, ny));
                    }
                }
            }
        }

        BinaryMask::from_fn(resolution, |x, y| {
            labels[y as usize * width + x as usize] == Label::Edge
        })
    }
}

struct Gradients {
    width: usize,
    height: usize,
    dx: Vec<i32>,
    dy: Vec<i32>,
    mag: Vec<i32>,
}

impl Gradients {
    /// 3x3 Sobel derivatives with replicated borders.
    fn sobel(gray: &GrayImage) -> Self {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let raw = gray.as_raw();
        let px = |x: isize, y: isize| -> i32 {
            let x = x.clamp(0, width as isize - 1) as usize;
            let y = y.clamp(0, height as isize - 1) as usize;
            i32::from(raw[y * width + x])
        };

        let mut dx = vec![0; width * height];
        let mut dy = vec![0; width * height];
        let mut mag = vec![0; width * height];
        for y in 0..height as isize {
            for x in 0..width as isize {
                let gx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
                let gy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));
                let i = y as usize * width + x as usize;
                dx[i] = gx;
                dy[i] = gy;
                mag[i] = gx.abs() + gy.abs();
            }
        }

        Self {
            width,
            height,
            dx,
            dy,
            mag,
        }
    }

    /// Magnitude at a possibly out-of-range position; zero outside the image.
    fn mag_at(&self, x: isize, y: isize) -> i32 {
        if x < 0 || y < 0 || x >= self.width as isize || y >= self.height as isize {
            0
        } else {
            self.mag[y as usize * self.width + x as usize]
        }
    }

    /// Non-maximum suppression along the quantised gradient direction.
    fn is_local_max(&self, x: usize, y: usize) -> bool {
        let i = y * self.width + x;
        let (gx, gy, m) = (self.dx[i], self.dy[i], self.mag[i]);
        let (x, y) = (x as isize, y as isize);

        let xs = i64::from(gx.abs());
        let ys = i64::from(gy.abs()) << 15;
        let tg22x = xs * TAN_22_5_Q15;

        if ys < tg22x {
            // Mostly horizontal gradient: compare left and right.
            m > self.mag_at(x - 1, y) && m >= self.mag_at(x + 1, y)
        } else if ys > tg22x + (xs << 16) {
            m > self.mag_at(x, y - 1) && m >= self.mag_at(x, y + 1)
        } else {
            let s = if (gx ^ gy) < 0 { -1 } else { 1 };
            m > self.mag_at(x - s, y - 1) && m > self.mag_at(x + s, y + 1)
        }
    }
}
