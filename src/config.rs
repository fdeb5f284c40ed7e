use std::time::Duration;

use crate::segmentation::{HighlightColor, MogSettings, Resolution};

/// Settings for the per-frame vision stages.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionConfig {
    pub resolution: Resolution,
    pub background: MogSettings,
    pub silhouette_threshold: u8,
    pub edge_low: u16,
    pub edge_high: u16,
    pub highlight: HighlightColor,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            background: MogSettings::default(),
            silhouette_threshold: 80,
            edge_low: 50,
            edge_high: 150,
            highlight: HighlightColor::default(),
        }
    }
}

/// What to do when the camera fails to deliver a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many failures in a row; `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: None,
            delay: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub vision: VisionConfig,
    pub jpeg_quality: u8,
    /// Frame pacing target; 0 runs as fast as frames arrive.
    pub fps: u32,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vision: VisionConfig::default(),
            jpeg_quality: 95,
            fps: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn frame_duration(&self) -> Option<Duration> {
        (self.fps > 0).then(|| Duration::from_secs_f32(1.0 / self.fps as f32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tuning() {
        let config = PipelineConfig::default();
        assert_eq!(config.vision.resolution, Resolution::new(640, 480));
        assert_eq!(config.vision.background.history, 200);
        assert_eq!(config.vision.background.var_threshold, 25.0);
        assert_eq!(config.vision.background.motion_threshold, 25);
        assert_eq!(config.vision.silhouette_threshold, 80);
        assert_eq!((config.vision.edge_low, config.vision.edge_high), (50, 150));
        assert_eq!(config.retry.max_consecutive_failures, None);
    }

    #[test]
    fn zero_fps_disables_pacing() {
        let config = PipelineConfig {
            fps: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.frame_duration(), None);
        assert!(PipelineConfig::default().frame_duration().is_some());
    }
}
