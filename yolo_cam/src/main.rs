//! Detection server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use yolo_cam::{
    config::{DetectorConfig, LoopConfig},
    endpoints::{router, stream_channels},
    meter::spawn_meter_logger,
    nn::{ModelSource, YoloModel},
    pipeline::{Detector, FrameLoop},
    render::{load_font, DetectionSink, DirectorySink, LogSink},
    sensors::{FrameSource, ImageFileSource, ThreadedSource},
    utils::default_model_dir,
    LabelTable,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Name of the ONNX model, loaded from `<model-dir>/<model>.onnx`
    #[clap(long, default_value = "yolov7-tiny")]
    model: String,

    /// Directory holding the models (defaults to the user cache directory)
    #[clap(long)]
    model_dir: Option<PathBuf>,

    /// Base URL to download a missing model from
    #[clap(long)]
    model_url: Option<String>,

    /// JSON file with an array of class names (defaults to the COCO classes)
    #[clap(long)]
    labels: Option<PathBuf>,

    /// TrueType font to caption boxes with
    #[clap(long)]
    font: Option<PathBuf>,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Run on these image files instead of the video device
    #[clap(long, num_args = 1..)]
    images: Vec<PathBuf>,

    /// Write annotated frames into this directory instead of serving them
    #[clap(long)]
    output_dir: Option<PathBuf>,

    /// Only log detections, neither serve nor write frames
    #[clap(long, conflicts_with = "output_dir")]
    headless: bool,

    /// Address of the HTTP server
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Side length of the square model input
    #[clap(long, default_value_t = 640)]
    input_size: u32,

    /// Minimum objectness of a detection
    #[clap(long, default_value_t = 0.25)]
    confidence: f32,

    /// Maximum overlap of two kept detections
    #[clap(long, default_value_t = 0.45)]
    iou: f32,

    /// Minimum class score of a detection
    #[clap(long, default_value_t = 0.25)]
    score: f32,

    /// Maximum number of detections per frame
    #[clap(long, default_value_t = 100)]
    max_detections: usize,

    /// Only suppress overlapping boxes of the same class
    #[clap(long)]
    class_aware: bool,

    /// Limit the number of processed frames per second
    #[clap(long)]
    max_fps: Option<f32>,

    /// Stop after this many frames failed in a row
    #[clap(long, default_value_t = 10)]
    max_failures: u32,

    /// Quality of streamed JPEG frames
    #[clap(long, default_value_t = 90)]
    jpeg_quality: i32,
}

impl Args {
    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            input_size: self.input_size,
            confidence_threshold: self.confidence,
            iou_threshold: self.iou,
            score_threshold: self.score,
            max_detections: self.max_detections,
            class_aware: self.class_aware,
        }
    }

    fn loop_config(&self) -> Result<LoopConfig> {
        let config = LoopConfig {
            max_consecutive_failures: self.max_failures,
            ..Default::default()
        };
        match self.max_fps {
            Some(fps) => config.with_max_fps(fps),
            None => Ok(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let config = args.detector_config();
    config.validate()?;
    let loop_config = args.loop_config()?;

    let labels = match &args.labels {
        Some(path) => LabelTable::from_path(path).map_err(|err| anyhow::anyhow!(err))?,
        None => LabelTable::coco(),
    };
    log::info!("Using {} class labels", labels.len());

    let font = args.font.as_ref().map(load_font).transpose()?;

    let source = ModelSource {
        name: args.model.clone(),
        model_dir: args.model_dir.clone().unwrap_or_else(default_model_dir),
        base_url: args.model_url.clone(),
    };
    let model = YoloModel::new(&source, config.input_size).await?;
    let detector = Detector::new(Arc::new(model), Arc::new(labels), config)?;

    let frames: Box<dyn FrameSource> = if args.images.is_empty() {
        let camera = ThreadedSource::camera(&args.device, "MJPG", None, None)
            .map_err(|err| anyhow::anyhow!(err))
            .with_context(|| format!("failed to open camera {}", args.device))?;
        Box::new(camera)
    } else {
        Box::new(ImageFileSource::new(args.images.clone()))
    };

    spawn_meter_logger();

    if args.headless {
        return run_loop(detector, frames, LogSink, loop_config).await;
    }

    match &args.output_dir {
        Some(dir) => {
            let sink = DirectorySink::new(dir, font)?;
            run_loop(detector, frames, sink, loop_config).await
        }
        None => {
            let (sink, hub) = stream_channels(font, args.jpeg_quality);

            // Serve HTTP server
            let addr: SocketAddr = args.server_address.parse()?;
            log::info!("Serving annotated stream on http://{addr}/stream");
            let server = axum::Server::try_bind(&addr)?.serve(router(hub).into_make_service());
            tokio::spawn(async move {
                if let Err(err) = server.await {
                    log::error!("HTTP server failed: {err}");
                }
            });

            run_loop(detector, frames, sink, loop_config).await
        }
    }
}

/// Run the frame loop until it ends or Ctrl-C is pressed.
async fn run_loop(
    detector: Detector,
    frames: Box<dyn FrameSource>,
    sink: impl DetectionSink,
    config: LoopConfig,
) -> Result<()> {
    let mut frame_loop = FrameLoop::new(detector, frames, sink, config);

    let cancel = frame_loop.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Stopping");
            cancel.cancel();
        }
    });

    let summary = frame_loop.run().await?;
    log::info!(
        "Processed {} of {} frames ({} failed)",
        summary.processed,
        summary.frames,
        summary.failures
    );

    Ok(())
}
