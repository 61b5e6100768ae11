//! Drawing detections onto frames and handing results to their consumers.
//!
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::detection::{Detection, FrameReport};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use rusttype::{Font, Scale};

const LABEL_SCALE: Scale = Scale { x: 16.0, y: 16.0 };

const PALETTE: [[u8; 3]; 8] = [
    [0, 255, 0],
    [255, 56, 56],
    [255, 157, 151],
    [255, 178, 29],
    [72, 249, 10],
    [0, 194, 255],
    [52, 69, 147],
    [203, 56, 255],
];

/// Consumer of processed frames.
pub trait DetectionSink {
    fn render(&mut self, frame: RgbImage, report: &FrameReport) -> Result<()>;
}

/// Box color of a class.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Load a TrueType font to caption boxes with.
pub fn load_font(path: impl AsRef<Path>) -> Result<Font<'static>> {
    let path = path.as_ref();
    let font_data =
        std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    Font::try_from_vec(font_data).with_context(|| format!("invalid font {}", path.display()))
}

/// Draw bounding boxes with labels and scores on the frame.
///
/// Detections are expected in frame pixels. Captions are only drawn if a font is given.
pub fn draw_detections(frame: &mut RgbImage, detections: &[Detection], font: Option<&Font>) {
    let (width, height) = frame.dimensions();

    for detection in detections {
        let (x, y) = (detection.x as i32, detection.y as i32);
        let (w, h) = (detection.width as u32, detection.height as u32);
        if w == 0 || h == 0 || x >= width as i32 || y >= height as i32 {
            continue;
        }

        let color = class_color(detection.class_id);
        draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w, h), color);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(frame, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), color);
        }

        if let Some(font) = font {
            let caption = format!("{} {:.0}%", detection.label, detection.score * 100.0);
            let (text_w, text_h) = text_size(LABEL_SCALE, font, &caption);
            // Put the caption above the box unless it would leave the frame
            let text_y = if y >= text_h { y - text_h } else { y };

            if text_w > 0 && text_h > 0 {
                draw_filled_rect_mut(
                    frame,
                    Rect::at(x, text_y).of_size(text_w as u32, text_h as u32),
                    color,
                );
            }
            draw_text_mut(frame, Rgb([0, 0, 0]), x, text_y, LABEL_SCALE, font, &caption);
        }
    }
}

/// Writes annotated frames and their reports into a directory.
pub struct DirectorySink {
    dir: PathBuf,
    font: Option<Font<'static>>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, font: Option<Font<'static>>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self { dir, font })
    }

    /// Path of the annotated image of a frame.
    pub fn frame_path(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("frame-{frame_index:06}.jpg"))
    }
}

impl DetectionSink for DirectorySink {
    fn render(&mut self, mut frame: RgbImage, report: &FrameReport) -> Result<()> {
        draw_detections(&mut frame, &report.detections, self.font.as_ref());

        let image_path = self.frame_path(report.frame_index);
        frame
            .save(&image_path)
            .with_context(|| format!("failed to write {}", image_path.display()))?;

        let report_path = image_path.with_extension("json");
        std::fs::write(&report_path, serde_json::to_vec_pretty(report)?)
            .with_context(|| format!("failed to write {}", report_path.display()))?;

        log::info!(
            "Frame {}: {} detections written to {}",
            report.frame_index,
            report.detections.len(),
            image_path.display()
        );

        Ok(())
    }
}

/// Only logs what was detected.
#[derive(Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn render(&mut self, _frame: RgbImage, report: &FrameReport) -> Result<()> {
        for detection in report.detections.iter() {
            log::info!(
                "Frame {}: {} ({:.2}) at x={:.0} y={:.0} w={:.0} h={:.0}",
                report.frame_index,
                detection.label,
                detection.score,
                detection.x,
                detection.y,
                detection.width,
                detection.height
            );
        }
        Ok(())
    }
}
