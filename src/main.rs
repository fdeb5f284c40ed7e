mod capture;
mod config;
mod error;
mod output;
mod pipeline;
mod segmentation;

use anyhow::{Context, Result};
use capture::{CaptureSource, SyntheticCapture, WebcamCapture};
use clap::Parser;
use config::{PipelineConfig, RetryPolicy, VisionConfig};
use error::PipelineError;
use output::{JpegEncoder, MjpegPublisher};
use pipeline::{Pipeline, PipelineStats};
use segmentation::{HighlightColor, MogSettings, MotionPipeline, Resolution};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Use a generated test pattern instead of a camera
    #[arg(long)]
    synthetic: bool,

    /// Processing resolution; camera frames are rescaled to it
    #[arg(long, default_value = "640x480")]
    resolution: Resolution,

    /// Frames remembered by the background model
    #[arg(long, default_value_t = 200)]
    history: u32,

    /// Squared distance (in variances) under which a pixel matches the background
    #[arg(long, default_value_t = 25.0)]
    var_threshold: f32,

    /// Pixels darker than this are part of the silhouette
    #[arg(long, default_value_t = 80)]
    silhouette_threshold: u8,

    /// Hysteresis low threshold for edge linking
    #[arg(long, default_value_t = 50)]
    edge_low: u16,

    /// Hysteresis high threshold for edge seeds
    #[arg(long, default_value_t = 150)]
    edge_high: u16,

    /// Binarization level applied to the motion mask
    #[arg(long, default_value_t = 25)]
    motion_threshold: u8,

    /// Colour for moving edges, as R,G,B or #rrggbb
    #[arg(long, default_value = "255,0,0")]
    highlight_color: HighlightColor,

    /// Address the stream is served on
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 95)]
    jpeg_quality: u8,

    /// Target frames per second (0 = as fast as the camera delivers)
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Stop after this many capture failures in a row (default: retry forever)
    #[arg(long)]
    max_capture_failures: Option<u32>,

    /// Delay between capture retries, in milliseconds
    #[arg(long, default_value_t = 10)]
    capture_retry_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            vision: VisionConfig {
                resolution: self.resolution,
                background: MogSettings {
                    history: self.history,
                    var_threshold: self.var_threshold,
                    motion_threshold: self.motion_threshold,
                    ..MogSettings::default()
                },
                silhouette_threshold: self.silhouette_threshold,
                edge_low: self.edge_low,
                edge_high: self.edge_high,
                highlight: self.highlight_color,
            },
            jpeg_quality: self.jpeg_quality,
            fps: self.fps,
            retry: RetryPolicy {
                max_consecutive_failures: self.max_capture_failures,
                delay: Duration::from_millis(self.capture_retry_ms),
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = args.pipeline_config();

    tracing::info!("Motion silhouette stream starting");
    tracing::info!("Resolution: {}", config.vision.resolution);
    tracing::info!(
        "Background: history={}, var_threshold={}",
        config.vision.background.history,
        config.vision.background.var_threshold
    );
    tracing::info!(
        "Silhouette threshold: {}, edges: {}/{}, highlight: {}",
        config.vision.silhouette_threshold,
        config.vision.edge_low,
        config.vision.edge_high,
        config.vision.highlight
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("stream-http")
        .build()
        .context("Failed to start async runtime")?;

    let listener = runtime
        .block_on(TcpListener::bind(args.bind))
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    let publisher = MjpegPublisher::new();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let reset = Arc::new(AtomicBool::new(false));
    let server = runtime.spawn(output::serve(
        listener,
        publisher.subscribe(),
        reset.clone(),
        shutdown_rx,
    ));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping after the current frame");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    let result = if args.synthetic {
        tracing::info!("Using synthetic test pattern");
        let capture = SyntheticCapture::new(config.vision.resolution, None);
        stream(capture, publisher, reset, &config, &running)
    } else {
        let capture = WebcamCapture::new(args.input_device, config.vision.resolution)
            .context("Failed to initialize webcam capture")?;
        stream(capture, publisher, reset, &config, &running)
    };

    let _ = shutdown_tx.send(());
    match runtime.block_on(server) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!("{err:#}"),
        Err(err) => tracing::error!("HTTP server task failed: {err}"),
    }

    let stats = result?;
    tracing::info!(
        "Streamed {} frames ({} capture failures, {} dropped)",
        stats.frames_published,
        stats.capture_failures,
        stats.encode_failures
    );

    Ok(())
}

/// Run the frame loop to completion. The publisher is dropped on return,
/// which closes every viewer's stream.
fn stream<C: CaptureSource>(
    capture: C,
    publisher: MjpegPublisher,
    reset: Arc<AtomicBool>,
    config: &PipelineConfig,
    running: &AtomicBool,
) -> Result<PipelineStats, PipelineError> {
    let core = MotionPipeline::new(&config.vision);
    let encoder = JpegEncoder::new(config.jpeg_quality);
    let mut pipeline =
        Pipeline::new(capture, core, encoder, publisher, config).with_reset_trigger(reset);
    pipeline.run(running)?;
    Ok(pipeline.stats().clone())
}
