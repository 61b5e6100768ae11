//! Frame sources.
//!
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use rscam::{Camera, Config};
use simple_error::simple_error;

/// Result of asking a source for its next frame.
#[derive(Debug)]
pub enum Captured {
    Frame(RgbImage),
    /// No frame available this time, ask again later.
    NotReady,
    /// The source will never produce another frame.
    EndOfStream,
}

/// Something producing frames for the detection loop.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Captured>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<Captured> {
        (**self).next_frame()
    }
}

/// How long a source waits for its capture thread before reporting no frame.
const CAPTURE_POLL: Duration = Duration::from_millis(20);

/// Grabs one frame. `Ok(None)` drops the frame, an error stops the capture.
pub type CaptureFn = Box<dyn FnMut() -> Result<Option<RgbImage>, common::Error>>;

/// Frames captured on a dedicated thread.
///
/// Blocking device reads happen on that thread, the loop only polls for finished frames. At most
/// one frame is buffered, so a slow loop is never handed stale frames from a long queue.
pub struct ThreadedSource {
    name: String,
    frames_rx: Receiver<Result<RgbImage, common::Error>>,
}

impl ThreadedSource {
    /// Spawn a capture thread running the capture function `open` returns.
    ///
    /// `open` runs on the capture thread itself, so the device never has to cross threads. Its
    /// error is returned from here.
    pub fn spawn<F>(name: &str, open: F) -> Result<Self, common::Error>
    where
        F: FnOnce() -> Result<CaptureFn, common::Error> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (frames_tx, frames_rx) = mpsc::sync_channel(1);

        let thread_name = name.to_owned();
        thread::Builder::new()
            .name(format!("capture {name}"))
            .spawn(move || {
                let mut capture = match open() {
                    Ok(capture) => {
                        ready_tx.send(Ok(())).ok();
                        capture
                    }
                    Err(err) => {
                        ready_tx.send(Err(err)).ok();
                        return;
                    }
                };

                loop {
                    let frame = match capture() {
                        Ok(Some(frame)) => Ok(frame),
                        Ok(None) => continue,
                        Err(err) => Err(err),
                    };
                    let failed = frame.is_err();
                    // Receiver gone, the source was dropped
                    if frames_tx.send(frame).is_err() || failed {
                        break;
                    }
                }
                log::debug!("Capture thread of {thread_name} stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| simple_error!("capture thread of {} died while opening", name))??;

        Ok(Self {
            name: name.to_owned(),
            frames_rx,
        })
    }

    /// Open and start a video device delivering MJPG frames.
    ///
    /// Without an explicit `resolution` or `frame_rate`, the highest the device supports for
    /// `format` is used.
    pub fn camera(
        device_name: &str,
        format: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<Self, common::Error> {
        let device = device_name.to_owned();
        let format = format.to_owned();
        Self::spawn(device_name, move || {
            let cam = start_camera(&device, &format, resolution, frame_rate)?;
            let capture: CaptureFn = Box::new(move || {
                let frame = cam.capture()?;
                // Devices deliver broken frames while warming up
                match turbojpeg::decompress_image::<image::Rgb<u8>>(&frame[..]) {
                    Ok(image) => Ok(Some(image)),
                    Err(err) => {
                        log::warn!("Skipping undecodable frame from {device}: {err}");
                        Ok(None)
                    }
                }
            });
            Ok(capture)
        })
    }
}

impl FrameSource for ThreadedSource {
    fn next_frame(&mut self) -> Result<Captured> {
        match self.frames_rx.recv_timeout(CAPTURE_POLL) {
            Ok(Ok(frame)) => Ok(Captured::Frame(frame)),
            Ok(Err(err)) => {
                Err(anyhow!(err).context(format!("failed to capture from {}", self.name)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(Captured::NotReady),
            Err(RecvTimeoutError::Disconnected) => bail!("capture of {} has stopped", self.name),
        }
    }
}

/// Open a video device and start streaming.
fn start_camera(
    device_name: &str,
    format: &str,
    resolution: Option<(u32, u32)>,
    frame_rate: Option<(u32, u32)>,
) -> Result<Camera, common::Error> {
    let mut cam = Camera::new(device_name)?;
    log_supported_formats(&cam, format);
    let format = format.as_bytes();

    let resolution = resolution
        .map(Ok)
        .unwrap_or_else(|| get_max_resolution(&cam, format))?;

    let frame_rate = frame_rate
        .map(Ok)
        .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })?;

    log::info!(
        "Using camera {} at {}x{}, {}/{} s per frame",
        device_name,
        resolution.0,
        resolution.1,
        frame_rate.0,
        frame_rate.1
    );

    Ok(cam)
}

/// Image files, read one per frame in the given order.
pub struct ImageFileSource {
    paths: VecDeque<PathBuf>,
}

impl ImageFileSource {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

impl FrameSource for ImageFileSource {
    fn next_frame(&mut self) -> Result<Captured> {
        match self.paths.pop_front() {
            None => Ok(Captured::EndOfStream),
            Some(path) => {
                log::debug!("Reading {}", path.display());
                let image = image::open(&path)
                    .with_context(|| format!("failed to read image {}", path.display()))?
                    .to_rgb8();
                Ok(Captured::Frame(image))
            }
        }
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), common::Error> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Get the highest resolution in terms of number of pixels
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), common::Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    match interval_info {
        // Intervals are (numerator, denominator) seconds per frame
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(num, _)| *num > 0)
            .max_by_key(|(num, den)| den / num)
            .copied(),
        // The shortest interval is the highest frame rate
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
