use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use image::RgbImage;
use ndarray::Array2;
use tract_onnx::prelude::Tensor;
use yolo_cam::{
    config::{DetectorConfig, LoopConfig},
    nn::InferModel,
    pipeline::{Detector, FrameLoop, LoopState, StopReason},
    render::DetectionSink,
    sensors::{Captured, FrameSource},
    FrameReport, LabelTable,
};

/// Model answering every frame with the same rows, failing on selected calls.
struct ScriptedModel {
    rows: Array2<f32>,
    fail_calls: Vec<usize>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(rows: Array2<f32>) -> Self {
        Self {
            rows,
            fail_calls: vec![],
            calls: AtomicUsize::new(0),
        }
    }
}

impl InferModel for ScriptedModel {
    fn input_size(&self) -> u32 {
        64
    }

    fn run(&self, input: Tensor) -> Result<Array2<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(input.shape(), &[1, 3, 64, 64]);
        if self.fail_calls.contains(&call) {
            bail!("backend error on call {call}");
        }
        Ok(self.rows.clone())
    }
}

/// Source replaying a fixed script of captures.
struct ScriptedSource {
    script: VecDeque<Captured>,
    repeat_last: bool,
}

impl ScriptedSource {
    fn frames(n: usize) -> Self {
        Self {
            script: (0..n).map(|_| Captured::Frame(RgbImage::new(128, 64))).collect(),
            repeat_last: false,
        }
    }

    fn endless() -> Self {
        Self {
            script: VecDeque::new(),
            repeat_last: true,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Captured> {
        match self.script.pop_front() {
            Some(captured) => Ok(captured),
            None if self.repeat_last => Ok(Captured::Frame(RgbImage::new(128, 64))),
            None => Ok(Captured::EndOfStream),
        }
    }
}

#[derive(Clone, Default)]
struct CollectingSink {
    reports: Arc<Mutex<Vec<FrameReport>>>,
}

impl DetectionSink for CollectingSink {
    fn render(&mut self, frame: RgbImage, report: &FrameReport) -> Result<()> {
        assert_eq!(frame.dimensions(), (report.width, report.height));
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Two overlapping dogs and a separate cat, in 64x64 model input pixels.
fn model_rows() -> Array2<f32> {
    let mut rows = Array2::from_elem((4, 85), 0.05);
    let boxes = [
        ([16.0, 16.0, 8.0, 8.0], 0.9, 16, 0.9),
        ([16.5, 16.0, 8.0, 8.0], 0.8, 16, 0.7),
        ([48.0, 40.0, 10.0, 12.0], 0.6, 15, 0.8),
        ([30.0, 30.0, 4.0, 4.0], 0.1, 0, 0.99),
    ];
    for (i, (bbox, objectness, class_id, score)) in boxes.into_iter().enumerate() {
        for (j, v) in bbox.into_iter().enumerate() {
            rows[[i, j]] = v;
        }
        rows[[i, 4]] = objectness;
        rows[[i, 5 + class_id]] = score;
    }
    rows
}

fn detector(model: ScriptedModel) -> Detector {
    let config = DetectorConfig {
        input_size: 64,
        ..Default::default()
    };
    Detector::new(Arc::new(model), Arc::new(LabelTable::coco()), config).unwrap()
}

#[tokio::test]
async fn frames_are_detected_and_rendered_in_order() -> Result<()> {
    let sink = CollectingSink::default();
    let mut frame_loop = FrameLoop::new(
        detector(ScriptedModel::new(model_rows())),
        ScriptedSource::frames(3),
        sink.clone(),
        LoopConfig::default(),
    );

    let summary = frame_loop.run().await?;

    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failures, 0);
    assert_eq!(frame_loop.state(), LoopState::Stopped(StopReason::EndOfStream));

    let reports = sink.reports.lock().unwrap();
    let indices: Vec<u64> = reports.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, [0, 1, 2]);

    for report in reports.iter() {
        let labels: Vec<&str> = report.detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, ["dog", "cat"]);

        // Model input is 64x64, frames are 128x64
        let dog = &report.detections[0];
        assert_eq!((dog.x, dog.y, dog.width, dog.height), (24.0, 12.0, 16.0, 8.0));
        assert_eq!(dog.score, 0.9);
    }

    Ok(())
}

#[tokio::test]
async fn frames_not_ready_are_skipped() -> Result<()> {
    let source = ScriptedSource {
        script: VecDeque::from([
            Captured::NotReady,
            Captured::Frame(RgbImage::new(128, 64)),
            Captured::NotReady,
            Captured::NotReady,
            Captured::Frame(RgbImage::new(128, 64)),
        ]),
        repeat_last: false,
    };
    let sink = CollectingSink::default();
    let mut frame_loop = FrameLoop::new(
        detector(ScriptedModel::new(model_rows())),
        source,
        sink.clone(),
        LoopConfig::default(),
    );

    let summary = frame_loop.run().await?;

    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.processed, 2);
    assert_eq!(sink.reports.lock().unwrap().len(), 2);

    Ok(())
}

#[tokio::test]
async fn empty_model_output_renders_frames_without_detections() -> Result<()> {
    let sink = CollectingSink::default();
    let mut frame_loop = FrameLoop::new(
        detector(ScriptedModel::new(Array2::zeros((0, 85)))),
        ScriptedSource::frames(2),
        sink.clone(),
        LoopConfig::default(),
    );

    let summary = frame_loop.run().await?;

    assert_eq!(summary.processed, 2);
    assert!(sink
        .reports
        .lock()
        .unwrap()
        .iter()
        .all(|report| report.detections.is_empty()));

    Ok(())
}

#[tokio::test]
async fn isolated_failures_do_not_stop_the_loop() -> Result<()> {
    let model = ScriptedModel {
        fail_calls: vec![1, 3, 4],
        ..ScriptedModel::new(model_rows())
    };
    let sink = CollectingSink::default();
    let mut frame_loop = FrameLoop::new(
        detector(model),
        ScriptedSource::frames(6),
        sink.clone(),
        LoopConfig {
            max_consecutive_failures: 3,
            ..Default::default()
        },
    );

    let summary = frame_loop.run().await?;

    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.frames, 6);
    assert_eq!(summary.failures, 3);
    assert_eq!(summary.processed, 3);

    let indices: Vec<u64> = sink
        .reports
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.frame_index)
        .collect();
    assert_eq!(indices, [0, 2, 5]);

    Ok(())
}

#[tokio::test]
async fn consecutive_failures_stop_the_loop() {
    let model = ScriptedModel {
        fail_calls: (0..100).collect(),
        ..ScriptedModel::new(model_rows())
    };
    let mut frame_loop = FrameLoop::new(
        detector(model),
        ScriptedSource::endless(),
        CollectingSink::default(),
        LoopConfig {
            max_consecutive_failures: 2,
            ..Default::default()
        },
    );

    let err = frame_loop.run().await.unwrap_err();

    assert!(err.to_string().contains("2 failed frames"));
    assert_eq!(
        frame_loop.state(),
        LoopState::Stopped(StopReason::TooManyFailures)
    );
}

#[tokio::test]
async fn cancelled_loop_stops_between_frames() -> Result<()> {
    let sink = CollectingSink::default();
    let mut frame_loop = FrameLoop::new(
        detector(ScriptedModel::new(model_rows())),
        ScriptedSource::endless(),
        sink.clone(),
        LoopConfig::default().with_max_fps(100.0)?,
    );

    let cancel = frame_loop.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let summary = frame_loop.run().await?;

    assert_eq!(summary.reason, StopReason::Cancelled);
    assert_eq!(frame_loop.state(), LoopState::Stopped(StopReason::Cancelled));
    assert_eq!(sink.reports.lock().unwrap().len() as u64, summary.processed);

    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_processes_nothing() -> Result<()> {
    let sink = CollectingSink::default();
    let mut frame_loop = FrameLoop::new(
        detector(ScriptedModel::new(model_rows())),
        ScriptedSource::endless(),
        sink.clone(),
        LoopConfig::default(),
    );
    frame_loop.cancel_token().cancel();

    let summary = frame_loop.run().await?;

    assert_eq!(summary.reason, StopReason::Cancelled);
    assert_eq!(summary.processed, 0);
    assert!(sink.reports.lock().unwrap().is_empty());

    Ok(())
}
