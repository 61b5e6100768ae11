//! Endpoints of HTTP server.
//!
//! Annotated frames are served as an MJPEG stream which browsers display in a plain `<img>`
//! element. The detections of the most recent frame are available as JSON.
use std::{convert::Infallible, sync::Arc};

use anyhow::Result;
use axum::{
    body::StreamBody, http::header, response::IntoResponse, routing::get, Extension, Json, Router,
};
use bytes::Bytes;
use common::detection::FrameReport;
use futures::StreamExt;
use image::RgbImage;
use rusttype::Font;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::{
    as_jpeg_stream_item,
    meter::METER,
    render::{draw_detections, DetectionSink},
};

/// Number of encoded frames buffered per stream client.
const STREAM_BUFFER: usize = 4;

/// Shared state of the HTTP endpoints.
pub struct StreamHub {
    frames_tx: broadcast::Sender<Bytes>,
    report_rx: watch::Receiver<FrameReport>,
}

impl StreamHub {
    /// Subscribe to the MJPEG parts of annotated frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames_tx.subscribe()
    }

    pub fn latest_report(&self) -> FrameReport {
        self.report_rx.borrow().clone()
    }
}

/// Sink publishing annotated frames to the HTTP endpoints.
pub struct StreamSink {
    frames_tx: broadcast::Sender<Bytes>,
    report_tx: watch::Sender<FrameReport>,
    font: Option<Font<'static>>,
    jpeg_quality: i32,
}

/// Create a connected sink and hub.
pub fn stream_channels(
    font: Option<Font<'static>>,
    jpeg_quality: i32,
) -> (StreamSink, Arc<StreamHub>) {
    let (frames_tx, _) = broadcast::channel(STREAM_BUFFER);
    let (report_tx, report_rx) = watch::channel(FrameReport::default());

    let sink = StreamSink {
        frames_tx: frames_tx.clone(),
        report_tx,
        font,
        jpeg_quality,
    };
    let hub = Arc::new(StreamHub {
        frames_tx,
        report_rx,
    });

    (sink, hub)
}

impl DetectionSink for StreamSink {
    fn render(&mut self, mut frame: RgbImage, report: &FrameReport) -> Result<()> {
        self.report_tx.send_replace(report.clone());

        // Nobody is watching, skip drawing and encoding
        if self.frames_tx.receiver_count() == 0 {
            return Ok(());
        }

        draw_detections(&mut frame, &report.detections, self.font.as_ref());
        let buf =
            turbojpeg::compress_image(&frame, self.jpeg_quality, turbojpeg::Subsamp::Sub2x2)?;
        self.frames_tx.send(as_jpeg_stream_item(&buf)).ok();

        Ok(())
    }
}

/// Build the HTTP router.
pub fn router(hub: Arc<StreamHub>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(annotated_stream))
        .route("/detections", get(latest_detections))
        .layer(Extension(hub))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Endpoint of the annotated frame stream.
pub async fn annotated_stream(Extension(hub): Extension<Arc<StreamHub>>) -> impl IntoResponse {
    log::info!("Annotated stream requested");

    let stream = BroadcastStream::new(hub.subscribe()).filter_map(|part| async move {
        match part {
            Ok(part) => {
                METER.tick_streamed();
                Some(Ok::<_, Infallible>(part))
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                log::debug!("Stream client lagging, skipped {skipped} frames");
                None
            }
        }
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Detections of the most recent frame.
pub async fn latest_detections(Extension(hub): Extension<Arc<StreamHub>>) -> Json<FrameReport> {
    Json(hub.latest_report())
}
