//! Per-frame detection and the loop driving it.
//!
//! A frame goes through preprocess -> infer -> decode -> suppress -> scale -> render. Frames are
//! handled strictly one after another; the next one is only requested once the previous one was
//! rendered.
use std::{sync::Arc, time::Instant};

use anyhow::{bail, Result};
use common::{
    detection::{Detection, FrameReport},
    labels::LabelTable,
};
use image::RgbImage;
use ndarray::ArrayView2;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{DetectorConfig, LoopConfig},
    decode::decode_rows,
    meter::METER,
    nms::suppress,
    nn::InferModel,
    preproc::Preprocessor,
    render::DetectionSink,
    sensors::{Captured, FrameSource},
};

/// Model plus everything needed to turn a frame into detections.
pub struct Detector {
    model: Arc<dyn InferModel>,
    preproc: Preprocessor,
    labels: Arc<LabelTable>,
    config: DetectorConfig,
}

impl Detector {
    pub fn new(
        model: Arc<dyn InferModel>,
        labels: Arc<LabelTable>,
        config: DetectorConfig,
    ) -> Result<Self> {
        config.validate()?;
        if model.input_size() != config.input_size {
            bail!(
                "model expects inputs of size {}, configured for {}",
                model.input_size(),
                config.input_size
            );
        }

        Ok(Self {
            preproc: Preprocessor::new(config.input_size),
            model,
            labels,
            config,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect objects in a frame.
    ///
    /// Inference runs on the blocking thread pool; this is the only point where the call yields.
    pub async fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let input = self.preproc.to_tensor(frame);

        let model = Arc::clone(&self.model);
        let rows = tokio::task::spawn_blocking(move || model.run(input)).await??;

        let (width, height) = frame.dimensions();
        self.postproc(rows.view(), width, height)
    }

    /// Turn raw model rows into detections in a frame of `width` x `height`.
    pub fn postproc(
        &self,
        rows: ArrayView2<f32>,
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>> {
        let mut candidates = decode_rows(rows, &self.labels, self.config.confidence_threshold)?;
        let num_candidates = candidates.len();

        // Boxes entirely outside the input would end up as empty detections on the frame edge
        let input_size = self.config.input_size as f32;
        candidates.retain(|candidate| candidate.bbox.area_within(input_size) > 0.0);

        let kept = suppress(candidates, &self.config);

        log::debug!(
            "{} rows, {} candidates, {} kept",
            rows.nrows(),
            num_candidates,
            kept.len()
        );

        Ok(kept
            .iter()
            .map(|candidate| {
                Detection::from_candidate(candidate, self.config.input_size, width, height)
            })
            .filter(|detection| detection.width > 0.0 && detection.height > 0.0)
            .collect())
    }
}

/// Why a frame loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    EndOfStream,
    TooManyFailures,
}

/// State of a frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

/// Counters of a finished frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    /// Ticks that processed a frame or failed.
    pub frames: u64,
    /// Frames rendered with their detections.
    pub processed: u64,
    /// Ticks on which the source had no frame ready.
    pub skipped: u64,
    pub failures: u64,
    pub reason: StopReason,
}

/// Drives frames from a source through a detector into a sink.
pub struct FrameLoop<S, K> {
    detector: Detector,
    source: S,
    sink: K,
    config: LoopConfig,
    cancel: CancellationToken,
    state: LoopState,
}

impl<S: FrameSource, K: DetectionSink> FrameLoop<S, K> {
    pub fn new(detector: Detector, source: S, sink: K, config: LoopConfig) -> Self {
        Self {
            detector,
            source,
            sink,
            config,
            cancel: CancellationToken::new(),
            state: LoopState::Running,
        }
    }

    /// Token stopping the loop between two frames once cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until the source ends, the loop is cancelled or too many frames failed in a row.
    ///
    /// Running into the failure limit is reported as an error, every other stop as a summary.
    pub async fn run(&mut self) -> Result<LoopSummary> {
        let mut summary = LoopSummary {
            frames: 0,
            processed: 0,
            skipped: 0,
            failures: 0,
            reason: StopReason::Cancelled,
        };
        let mut consecutive_failures = 0;
        let cancel = self.cancel.clone();

        if let Err(err) = self.config.validate() {
            self.state = LoopState::Stopped(StopReason::Cancelled);
            return Err(err);
        }

        let mut pacer = self.config.frame_interval.map(|period| {
            let mut pacer = interval(period);
            pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            pacer
        });

        self.state = LoopState::Running;
        let reason = loop {
            if let Some(pacer) = pacer.as_mut() {
                tokio::select! {
                    _ = cancel.cancelled() => break StopReason::Cancelled,
                    _ = pacer.tick() => {}
                }
            } else if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break StopReason::Cancelled,
                result = self.step(summary.frames) => result,
            };

            match result {
                Ok(Step::Processed) => {
                    summary.frames += 1;
                    summary.processed += 1;
                    consecutive_failures = 0;
                }
                Ok(Step::Skipped) => {
                    summary.skipped += 1;
                    tokio::task::yield_now().await;
                }
                Ok(Step::EndOfStream) => break StopReason::EndOfStream,
                Err(err) => {
                    summary.frames += 1;
                    summary.failures += 1;
                    consecutive_failures += 1;
                    METER.tick_failed();
                    log::error!("Frame {} failed: {:#}", summary.frames - 1, err);

                    if consecutive_failures >= self.config.max_consecutive_failures {
                        self.state = LoopState::Stopped(StopReason::TooManyFailures);
                        bail!(
                            "stopping after {} failed frames in a row, last error: {:#}",
                            consecutive_failures,
                            err
                        );
                    }
                }
            }
        };

        summary.reason = reason;
        self.state = LoopState::Stopped(reason);
        log::info!("Frame loop stopped: {summary:?}");

        Ok(summary)
    }

    /// Handle one tick of the loop.
    async fn step(&mut self, frame_index: u64) -> Result<Step> {
        let frame = match self.source.next_frame()? {
            Captured::Frame(frame) => frame,
            Captured::NotReady => return Ok(Step::Skipped),
            Captured::EndOfStream => return Ok(Step::EndOfStream),
        };
        METER.tick_captured();

        let start = Instant::now();
        let detections = self.detector.detect(&frame).await?;
        let detect_ms = start.elapsed().as_secs_f32() * 1000.0;

        METER.tick_processed(detections.len());

        let (width, height) = frame.dimensions();
        let report = FrameReport {
            frame_index,
            width,
            height,
            detect_ms,
            detections,
        };
        self.sink.render(frame, &report)?;

        Ok(Step::Processed)
    }
}

enum Step {
    Processed,
    Skipped,
    EndOfStream,
}
