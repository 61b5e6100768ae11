use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Frame counters, reset on every read.
#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    processed_frames: AtomicU64,
    failed_frames: AtomicU64,
    detections: AtomicU64,
    streamed_frames: AtomicU64,
}

/// Counter values read at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeterReading {
    pub captured_frames: u64,
    pub processed_frames: u64,
    pub failed_frames: u64,
    pub detections: u64,
    pub streamed_frames: u64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            processed_frames: AtomicU64::new(0),
            failed_frames: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            streamed_frames: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_processed(&self, num_detections: usize) {
        self.processed_frames.fetch_add(1, Ordering::Relaxed);
        self.detections
            .fetch_add(num_detections as u64, Ordering::Relaxed);
    }

    pub fn tick_failed(&self) {
        self.failed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_streamed(&self) {
        self.streamed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset(&self) -> MeterReading {
        MeterReading {
            captured_frames: self.captured_frames.swap(0, Ordering::Relaxed),
            processed_frames: self.processed_frames.swap(0, Ordering::Relaxed),
            failed_frames: self.failed_frames.swap(0, Ordering::Relaxed),
            detections: self.detections.swap(0, Ordering::Relaxed),
            streamed_frames: self.streamed_frames.swap(0, Ordering::Relaxed),
        }
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let reading = METER.get_reset();
            let elapsed = start.elapsed().as_secs_f32();
            let per_second = |count: u64| count as f32 / elapsed;

            if reading.captured_frames > 0 {
                log::info!(
                    "Captured frames per second: {:.2}",
                    per_second(reading.captured_frames)
                )
            }
            if reading.processed_frames > 0 {
                log::info!(
                    "Processed frames per second: {:.2} ({:.1} detections per frame)",
                    per_second(reading.processed_frames),
                    reading.detections as f32 / reading.processed_frames as f32
                )
            }
            if reading.failed_frames > 0 {
                log::warn!("{} frames failed", reading.failed_frames)
            }
            if reading.streamed_frames > 0 {
                log::info!(
                    "Streamed frames per second: {:.2}",
                    per_second(reading.streamed_frames)
                )
            }
        }
    })
}
