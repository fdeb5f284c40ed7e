mod compose;
mod edges;
mod mog;
mod preprocess;
mod silhouette;
pub mod types;

pub use compose::{HighlightColor, MotionCompositor};
pub use edges::EdgeDetector;
pub use mog::{GaussianMixtureModel, MogSettings};
pub use preprocess::Preprocessor;
pub use silhouette::SilhouetteExtractor;
pub use types::{BackgroundSubtractor, Resolution};

use image::{GrayImage, RgbImage};

use crate::config::VisionConfig;
use crate::error::VisionError;

/// Create the default background model (adaptive Gaussian mixture)
pub fn create_default_model(config: &VisionConfig) -> Box<dyn BackgroundSubtractor> {
    Box::new(GaussianMixtureModel::new(config.resolution, config.background))
}

/// Result of running one frame through the vision stages.
pub struct FrameOutput {
    pub composite: RgbImage,
    pub foreground_pixels: usize,
    pub moving_edge_pixels: usize,
}

/// The per-frame vision pipeline.
///
/// Owns the background model; every call to [`MotionPipeline::process`]
/// advances it by exactly one frame, so one instance must see each physical
/// frame exactly once and in order.
pub struct MotionPipeline {
    preprocessor: Preprocessor,
    background: Box<dyn BackgroundSubtractor>,
    silhouette: SilhouetteExtractor,
    edges: EdgeDetector,
    compositor: MotionCompositor,
    frames_processed: u64,
}

impl MotionPipeline {
    pub fn new(config: &VisionConfig) -> Self {
        Self::with_background(config, create_default_model(config))
    }

    pub fn with_background(config: &VisionConfig, background: Box<dyn BackgroundSubtractor>) -> Self {
        if background.resolution() != config.resolution {
            tracing::warn!(
                "Background model expects {}, frames will be {}",
                background.resolution(),
                config.resolution
            );
        }

        let edges = EdgeDetector::new(config.edge_low, config.edge_high);
        let (low, high) = edges.thresholds();
        tracing::debug!("Edge hysteresis thresholds: {}/{}", low, high);

        Self {
            preprocessor: Preprocessor::new(config.resolution),
            background,
            silhouette: SilhouetteExtractor::new(config.silhouette_threshold),
            edges,
            compositor: MotionCompositor::new(config.highlight),
            frames_processed: 0,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.preprocessor.target()
    }

    /// Frames that made it through every stage.
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Discard the learned background; the next frame starts a fresh model.
    pub fn reset_background(&mut self) {
        self.background.reset_state();
    }

    /// Resize, convert to grayscale and run the vision stages.
    pub fn process(&mut self, frame: &RgbImage) -> Result<FrameOutput, VisionError> {
        let gray = self.preprocessor.preprocess(frame);
        self.process_gray(&gray)
    }

    pub fn process_gray(&mut self, gray: &GrayImage) -> Result<FrameOutput, VisionError> {
        let _span = tracing::debug_span!("motion_frame", frame = self.frames_processed + 1).entered();

        let motion = self.background.classify(gray)?;
        let (silhouette, base) = self.silhouette.extract(gray);
        let edges = self.edges.detect(&silhouette);
        let (composite, moving) = self.compositor.compose(&edges, &motion, base)?;

        self.frames_processed += 1;
        tracing::trace!(
            foreground = motion.count(),
            edges = edges.count(),
            moving = moving.count(),
            "frame composed"
        );

        Ok(FrameOutput {
            composite,
            foreground_pixels: motion.count(),
            moving_edge_pixels: moving.count(),
        })
    }
}
