//! Detection data model.
//!
//! Model outputs describe boxes by their center point and size in pixels of the model input.
//! Everything handed to a renderer is converted once into frame pixels with the top-left corner
//! plus width and height.
use serde::{Deserialize, Serialize};

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Box given by center point and size.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CenterBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl CenterBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Corner points as `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
    pub fn corners(&self) -> [f32; 4] {
        let (half_w, half_h) = (self.w / 2.0, self.h / 2.0);
        [
            self.cx - half_w,
            self.cy - half_h,
            self.cx + half_w,
            self.cy + half_h,
        ]
    }

    /// Area of the box, zero for degenerate sizes.
    pub fn area(&self) -> f32 {
        corners_area(&self.corners())
    }

    /// Area of the part of the box within the square `[0, size] x [0, size]`.
    pub fn area_within(&self, size: f32) -> f32 {
        corners_area(&self.corners().map(|v| v.clamp(0.0, size)))
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &CenterBox) -> f32 {
        let (a, b) = (self.corners(), other.corners());

        // If the boxes do not overlap, the bottom-right point of the overlap ends up above or to
        // the left of its top-left point and the area is zero.
        let overlap = [
            f32::max(a[0], b[0]),
            f32::max(a[1], b[1]),
            f32::min(a[2], b[2]),
            f32::min(a[3], b[3]),
        ];
        let overlap_area = corners_area(&overlap);

        overlap_area / (corners_area(&a) + corners_area(&b) - overlap_area + EPS)
    }
}

/// Area enclosed by `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
fn corners_area(corners: &[f32; 4]) -> f32 {
    let width = corners[2] - corners[0];
    let height = corners[3] - corners[1];
    if width <= 0.0 || height <= 0.0 {
        return 0.0;
    }

    width * height
}

/// Decoded model row that passed the confidence threshold.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candidate {
    /// Box in model input pixels.
    pub bbox: CenterBox,
    pub class_id: usize,
    pub label: String,
    /// Probability of the winning class.
    pub score: f32,
    pub objectness: f32,
}

/// Final detection in frame pixels.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub class_id: usize,
    pub label: String,
    pub score: f32,
}

impl Detection {
    /// Scale a candidate from model input pixels into a frame of `frame_width` x `frame_height`.
    ///
    /// The model input is a square of side `input_size`, so both axes are scaled independently.
    /// The resulting rectangle is clipped to the frame.
    pub fn from_candidate(
        candidate: &Candidate,
        input_size: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let (frame_width, frame_height) = (frame_width as f32, frame_height as f32);
        let scale_x = frame_width / input_size as f32;
        let scale_y = frame_height / input_size as f32;

        let [x_tl, y_tl, x_br, y_br] = candidate.bbox.corners();
        let x_tl = (x_tl * scale_x).clamp(0.0, frame_width);
        let y_tl = (y_tl * scale_y).clamp(0.0, frame_height);
        let x_br = (x_br * scale_x).clamp(0.0, frame_width);
        let y_br = (y_br * scale_y).clamp(0.0, frame_height);

        Self {
            x: x_tl,
            y: y_tl,
            width: (x_br - x_tl).max(0.0),
            height: (y_br - y_tl).max(0.0),
            class_id: candidate.class_id,
            label: candidate.label.clone(),
            score: candidate.score,
        }
    }
}

/// Everything known about one processed frame.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
    /// Time spent turning the frame into detections.
    pub detect_ms: f32,
    pub detections: Vec<Detection>,
}
