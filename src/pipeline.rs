use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::CaptureSource;
use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{PipelineError, VisionError};
use crate::output::{FrameEncoder, FramePacket, OutputSink};
use crate::segmentation::MotionPipeline;

/// Counters and stage timings for one run of the frame loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_published: u64,
    pub capture_failures: u64,
    pub consecutive_capture_failures: u32,
    pub encode_failures: u64,
    pub background_resets: u64,
    pub total_capture_time: Duration,
    pub total_process_time: Duration,
    pub total_encode_time: Duration,
}

impl PipelineStats {
    fn average_ms(&self, total: Duration) -> f64 {
        if self.frames_captured == 0 {
            0.0
        } else {
            total.as_secs_f64() * 1000.0 / self.frames_captured as f64
        }
    }
}

/// Outcome of a single pass through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Published(u64),
    /// The frame was processed but could not be encoded.
    Dropped,
    /// The camera failed; nothing was processed.
    Retry,
    EndOfStream,
}

/// Everything one stream needs: camera, vision stages, encoder and sink.
///
/// Frames go through strictly one at a time; the next frame is not requested
/// until the previous one has been handed to the sink.
pub struct Pipeline<C, E, O> {
    capture: C,
    core: MotionPipeline,
    encoder: E,
    output: O,
    retry: RetryPolicy,
    frame_duration: Option<Duration>,
    reset_requested: Arc<AtomicBool>,
    stats: PipelineStats,
    sequence: u64,
}

impl<C, E, O> Pipeline<C, E, O>
where
    C: CaptureSource,
    E: FrameEncoder,
    O: OutputSink,
{
    pub fn new(capture: C, core: MotionPipeline, encoder: E, output: O, config: &PipelineConfig) -> Self {
        if capture.resolution() != core.resolution() {
            tracing::info!(
                "Capture delivers {}, frames will be rescaled to {}",
                capture.resolution(),
                core.resolution()
            );
        }

        Self {
            capture,
            core,
            encoder,
            output,
            retry: config.retry,
            frame_duration: config.frame_duration(),
            reset_requested: Arc::new(AtomicBool::new(false)),
            stats: PipelineStats::default(),
            sequence: 0,
        }
    }

    /// Share a flag that, when raised, makes the next tick discard the
    /// learned background before processing its frame.
    pub fn with_reset_trigger(mut self, flag: Arc<AtomicBool>) -> Self {
        self.reset_requested = flag;
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn core(&self) -> &MotionPipeline {
        &self.core
    }

    #[cfg(test)]
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Run until the source ends, `running` is cleared, or a fatal error.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), PipelineError> {
        tracing::info!("Starting main pipeline loop");
        tracing::info!("Press Ctrl+C to stop");

        while running.load(Ordering::Relaxed) {
            let loop_start = Instant::now();

            match self.tick()? {
                Tick::EndOfStream => {
                    tracing::info!("Frame source ended");
                    break;
                }
                Tick::Retry => continue,
                Tick::Published(1) => tracing::info!("First frame published"),
                Tick::Published(_) | Tick::Dropped => {}
            }

            // Log stats every 30 frames
            if self.stats.frames_captured % 30 == 0 {
                self.log_stats();
            }

            // Frame rate limiting
            if let Some(frame_duration) = self.frame_duration {
                let elapsed = loop_start.elapsed();
                if elapsed < frame_duration {
                    std::thread::sleep(frame_duration - elapsed);
                }
            }
        }

        tracing::info!(
            frames = self.stats.frames_captured,
            processed = self.core.frames_processed(),
            published = self.stats.frames_published,
            capture_failures = self.stats.capture_failures,
            encode_failures = self.stats.encode_failures,
            background_resets = self.stats.background_resets,
            "Pipeline stopped"
        );
        Ok(())
    }

    /// Acquire, process, encode and publish one frame.
    pub fn tick(&mut self) -> Result<Tick, PipelineError> {
        if self.reset_requested.swap(false, Ordering::Relaxed) {
            self.core.reset_background();
            self.stats.background_resets += 1;
        }

        let capture_start = Instant::now();
        let frame = match self.capture.capture_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Tick::EndOfStream),
            Err(err) => return self.capture_failed(err),
        };
        self.stats.total_capture_time += capture_start.elapsed();
        self.stats.consecutive_capture_failures = 0;
        self.stats.frames_captured += 1;

        let process_start = Instant::now();
        let output = self.core.process(&frame).map_err(|err| {
            let VisionError::ResolutionMismatch {
                stage,
                expected,
                actual,
            } = &err;
            tracing::error!(
                stage = *stage,
                expected = %expected,
                actual = %actual,
                "Frame does not fit the pipeline, stopping"
            );
            PipelineError::from(err)
        })?;
        self.stats.total_process_time += process_start.elapsed();

        let encode_start = Instant::now();
        let encoded = self.encoder.encode(&output.composite);
        self.stats.total_encode_time += encode_start.elapsed();
        let jpeg = match encoded {
            Ok(jpeg) => jpeg,
            Err(err) => {
                self.stats.encode_failures += 1;
                tracing::warn!(
                    frame = self.stats.frames_captured,
                    failures = self.stats.encode_failures,
                    "Dropping frame: {err:#}"
                );
                return Ok(Tick::Dropped);
            }
        };

        self.sequence += 1;
        let packet = FramePacket {
            sequence: self.sequence,
            jpeg,
        };
        self.output.publish(packet);
        self.stats.frames_published += 1;

        tracing::debug!(
            sequence = self.sequence,
            foreground = output.foreground_pixels,
            moving_edges = output.moving_edge_pixels,
            "frame done"
        );
        Ok(Tick::Published(self.sequence))
    }

    fn capture_failed(&mut self, err: anyhow::Error) -> Result<Tick, PipelineError> {
        self.stats.capture_failures += 1;
        self.stats.consecutive_capture_failures += 1;
        let failures = self.stats.consecutive_capture_failures;

        if let Some(max) = self.retry.max_consecutive_failures {
            if failures >= max.max(1) {
                tracing::error!(failures, "Giving up on the camera: {err:#}");
                return Err(PipelineError::CaptureExhausted {
                    failures,
                    source: err.into(),
                });
            }
        }

        if failures == 1 || failures % 30 == 0 {
            tracing::warn!(
                failures,
                total = self.stats.capture_failures,
                "Frame capture failed, retrying: {err:#}"
            );
        }

        if !self.retry.delay.is_zero() {
            std::thread::sleep(self.retry.delay);
        }
        Ok(Tick::Retry)
    }

    fn log_stats(&self) {
        let stats = &self.stats;
        let avg_capture_ms = stats.average_ms(stats.total_capture_time);
        let avg_process_ms = stats.average_ms(stats.total_process_time);
        let avg_encode_ms = stats.average_ms(stats.total_encode_time);
        let total_ms = avg_capture_ms + avg_process_ms + avg_encode_ms;
        let actual_fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

        tracing::info!(
            "Frame {}: capture={:.1}ms, process={:.1}ms, encode={:.1}ms, total={:.1}ms, fps={:.1}",
            stats.frames_captured,
            avg_capture_ms,
            avg_process_ms,
            avg_encode_ms,
            total_ms,
            actual_fps
        );
    }
}
