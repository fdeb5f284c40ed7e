use image::{GrayImage, Luma};

use super::types::{BackgroundSubtractor, BinaryMask, Resolution};
use crate::error::VisionError;

/// Tuning for the per-pixel Gaussian mixture background model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MogSettings {
    /// Number of frames the model effectively remembers.
    pub history: u32,
    /// Squared Mahalanobis distance under which a sample counts as background.
    pub var_threshold: f32,
    /// Maximum number of Gaussians kept per pixel.
    pub mixtures: usize,
    /// Share of total weight that must be explained before a component stops
    /// counting as background.
    pub background_ratio: f32,
    /// Squared Mahalanobis distance under which a sample updates a component.
    pub var_threshold_gen: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    /// Weight prior that prunes components nobody has matched lately.
    pub complexity_reduction: f32,
    /// Fixed learning rate; `None` derives it from the history length.
    pub learning_rate: Option<f32>,
    /// Classification output is re-binarized above this level.
    pub motion_threshold: u8,
}

impl Default for MogSettings {
    fn default() -> Self {
        Self {
            history: 200,
            var_threshold: 25.0,
            mixtures: 5,
            background_ratio: 0.9,
            var_threshold_gen: 9.0,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            complexity_reduction: 0.05,
            learning_rate: None,
            motion_threshold: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Gaussian {
    weight: f32,
    mean: f32,
    variance: f32,
}

/// Adaptive Gaussian mixture background model over grayscale frames.
///
/// Every pixel keeps up to `mixtures` weighted Gaussians sorted by weight.
/// Shadows are not modelled separately: a pixel is either foreground or
/// background.
pub struct GaussianMixtureModel {
    settings: MogSettings,
    resolution: Resolution,
    /// `mixtures` slots per pixel, row-major.
    components: Vec<Gaussian>,
    /// Number of live slots per pixel.
    modes: Vec<u8>,
    frames_seen: u64,
}

impl GaussianMixtureModel {
    pub fn new(resolution: Resolution, mut settings: MogSettings) -> Self {
        settings.mixtures = settings.mixtures.clamp(1, u8::MAX as usize);
        settings.history = settings.history.max(1);

        tracing::debug!(
            "Creating background model for {} ({} mixtures, history {})",
            resolution,
            settings.mixtures,
            settings.history
        );

        let pixels = resolution.pixel_count();
        Self {
            settings,
            resolution,
            components: vec![Gaussian::default(); pixels * settings.mixtures],
            modes: vec![0; pixels],
            frames_seen: 0,
        }
    }

    /// Frames folded into the model since creation or the last reset.
    #[cfg(test)]
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Learning rate for the frame currently being classified.
    ///
    /// Early on the rate is `1 / 2n` so the first frames settle quickly; it
    /// bottoms out at `1 / history`.
    fn learning_rate(&self) -> f32 {
        match self.settings.learning_rate {
            Some(rate) if self.frames_seen > 1 => rate.clamp(0.0, 1.0),
            _ => {
                let window = (2 * self.frames_seen).min(self.settings.history as u64).max(1);
                1.0 / window as f32
            }
        }
    }
}

impl BackgroundSubtractor for GaussianMixtureModel {
    fn classify(&mut self, frame: &GrayImage) -> Result<BinaryMask, VisionError> {
        let _span = tracing::debug_span!("mog_classify").entered();

        VisionError::check("background model", self.resolution, Resolution::of(frame))?;

        self.frames_seen += 1;
        let alpha = self.learning_rate();
        let settings = self.settings;

        let foreground: Vec<bool> = frame
            .as_raw()
            .iter()
            .zip(self.components.chunks_exact_mut(settings.mixtures))
            .zip(self.modes.iter_mut())
            .map(|((&sample, slots), used)| {
                update_pixel(slots, used, f32::from(sample), alpha, &settings)
            })
            .collect();

        let width = self.resolution.width as usize;
        let raw_mask = GrayImage::from_fn(self.resolution.width, self.resolution.height, |x, y| {
            if foreground[y as usize * width + x as usize] {
                Luma([u8::MAX])
            } else {
                Luma([0])
            }
        });
        Ok(BinaryMask::binarize(&raw_mask, settings.motion_threshold))
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting background model");
        self.components.fill(Gaussian::default());
        self.modes.fill(0);
        self.frames_seen = 0;
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// Fold one sample into a pixel's mixture. Returns `true` for foreground.
fn update_pixel(
    slots: &mut [Gaussian],
    used: &mut u8,
    sample: f32,
    alpha: f32,
    settings: &MogSettings,
) -> bool {
    let decay = 1.0 - alpha;
    let prune = alpha * settings.complexity_reduction;
    let mut live = *used as usize;

    let mut matched = false;
    let mut background = false;
    let mut total_weight = 0.0f32;

    for mode in 0..live {
        let mut weight = decay * slots[mode].weight - prune;
        let mut slot = mode;

        if !matched {
            let Gaussian { mean, variance, .. } = slots[mode];
            let diff = sample - mean;
            let dist2 = diff * diff;

            // Weight seen so far still belongs to the background share.
            if total_weight < settings.background_ratio
                && dist2 < settings.var_threshold * variance
            {
                background = true;
            }

            if dist2 < settings.var_threshold_gen * variance {
                matched = true;
                weight += alpha;
                let k = alpha / weight;
                let gaussian = &mut slots[mode];
                gaussian.mean += k * diff;
                gaussian.variance = (variance + k * (dist2 - variance))
                    .clamp(settings.var_min, settings.var_max);

                while slot > 0 && weight >= slots[slot - 1].weight {
                    slots.swap(slot, slot - 1);
                    slot -= 1;
                }
            }
        }

        if weight < prune {
            weight = 0.0;
        }
        slots[slot].weight = weight;
        total_weight += weight;
    }

    // Drop pruned components, keeping the weight order.
    let mut kept = 0;
    for mode in 0..live {
        if slots[mode].weight > 0.0 {
            slots[kept] = slots[mode];
            kept += 1;
        }
    }
    live = kept;

    if total_weight > f32::EPSILON {
        for gaussian in &mut slots[..live] {
            gaussian.weight /= total_weight;
        }
    }

    if !matched {
        let slot = if live == slots.len() {
            live - 1
        } else {
            live += 1;
            live - 1
        };

        let weight = if live == 1 {
            1.0
        } else {
            for (mode, gaussian) in slots[..live].iter_mut().enumerate() {
                if mode != slot {
                    gaussian.weight *= decay;
                }
            }
            alpha
        };
        slots[slot] = Gaussian {
            weight,
            mean: sample,
            variance: settings.var_init,
        };

        // Replacing a full mixture discards the evicted weight.
        let total: f32 = slots[..live].iter().map(|g| g.weight).sum();
        for gaussian in &mut slots[..live] {
            gaussian.weight /= total;
        }

        let mut i = slot;
        while i > 0 && slots[i].weight >= slots[i - 1].weight {
            slots.swap(i, i - 1);
            i -= 1;
        }
    }

    *used = live as u8;
    !background
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(resolution: Resolution, level: u8) -> GrayImage {
        GrayImage::from_pixel(resolution.width, resolution.height, Luma([level]))
    }

    fn with_square(resolution: Resolution, background: u8, square: u8) -> GrayImage {
        GrayImage::from_fn(resolution.width, resolution.height, |x, y| {
            if (10..20).contains(&x) && (10..20).contains(&y) {
                Luma([square])
            } else {
                Luma([background])
            }
        })
    }

    #[test]
    fn first_frame_is_all_foreground() {
        let r = Resolution::new(8, 8);
        let mut model = GaussianMixtureModel::new(r, MogSettings::default());
        let mask = model.classify(&flat(r, 120)).unwrap();
        assert_eq!(mask.count(), r.pixel_count());
    }

    #[test]
    fn static_frame_converges_to_background_within_history() {
        let r = Resolution::new(32, 24);
        let settings = MogSettings::default();
        let mut model = GaussianMixtureModel::new(r, settings);
        let frame = with_square(r, 200, 40);

        let mut converged_at = None;
        for n in 1..=settings.history {
            if model.classify(&frame).unwrap().is_empty() {
                converged_at = Some(n);
                break;
            }
        }
        assert!(converged_at.is_some(), "never converged");

        for _ in 0..10 {
            assert!(model.classify(&frame).unwrap().is_empty());
        }
    }

    #[test]
    fn new_dark_region_is_foreground() {
        let r = Resolution::new(32, 32);
        let mut model = GaussianMixtureModel::new(r, MogSettings::default());
        for _ in 0..30 {
            model.classify(&flat(r, 200)).unwrap();
        }

        let mask = model.classify(&with_square(r, 200, 30)).unwrap();
        assert_eq!(mask.count(), 100);
        assert!(mask.is_set(10, 10));
        assert!(mask.is_set(19, 19));
        assert!(!mask.is_set(9, 10));
        assert!(!mask.is_set(20, 19));
    }

    #[test]
    fn output_is_strictly_binary() {
        let r = Resolution::new(16, 16);
        let mut model = GaussianMixtureModel::new(r, MogSettings::default());
        for level in [10u8, 90, 200, 90, 10] {
            let frame = GrayImage::from_fn(16, 16, |x, y| Luma([level.wrapping_add((x * y) as u8)]));
            let mask = model.classify(&frame).unwrap();
            assert!(mask.as_image().as_raw().iter().all(|&v| v == 0 || v == 255));
        }
    }

    #[test]
    fn mismatched_frame_is_rejected_without_touching_state() {
        let r = Resolution::new(8, 8);
        let mut model = GaussianMixtureModel::new(r, MogSettings::default());
        model.classify(&flat(r, 50)).unwrap();

        let err = model.classify(&flat(Resolution::new(8, 9), 50)).unwrap_err();
        assert_eq!(
            err,
            VisionError::ResolutionMismatch {
                stage: "background model",
                expected: r,
                actual: Resolution::new(8, 9),
            }
        );
        assert_eq!(model.frames_seen(), 1);
    }

    #[test]
    fn reset_forgets_the_background() {
        let r = Resolution::new(8, 8);
        let mut model = GaussianMixtureModel::new(r, MogSettings::default());
        for _ in 0..5 {
            model.classify(&flat(r, 50)).unwrap();
        }
        assert!(model.classify(&flat(r, 50)).unwrap().is_empty());

        model.reset_state();
        assert_eq!(model.frames_seen(), 0);
        assert_eq!(model.classify(&flat(r, 50)).unwrap().count(), 64);
    }

    #[test]
    fn pixel_mixture_stays_bounded_and_normalized() {
        let settings = MogSettings::default();
        let mut slots = vec![Gaussian::default(); settings.mixtures];
        let mut used = 0u8;

        for (n, sample) in [0.0f32, 60.0, 120.0, 180.0, 240.0, 30.0, 90.0, 150.0]
            .into_iter()
            .enumerate()
        {
            let alpha = 1.0 / (2.0 * (n as f32 + 1.0)).min(settings.history as f32);
            update_pixel(&mut slots, &mut used, sample, alpha, &settings);
            assert!(used as usize <= settings.mixtures);

            let live = &slots[..used as usize];
            let total: f32 = live.iter().map(|g| g.weight).sum();
            assert!((total - 1.0).abs() < 1e-3, "weights sum to {total}");
            assert!(live.windows(2).all(|w| w[0].weight >= w[1].weight));
        }
    }
}
