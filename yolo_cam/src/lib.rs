//! Object detection on camera streams with YOLO models.
//!
//! Frames flow through `sensors` -> `preproc` -> `nn` -> `decode` -> `nms` -> `render`, driven
//! one at a time by the frame loop in `pipeline`.
pub mod config;
pub mod decode;
pub mod endpoints;
pub mod meter;
pub mod nms;
pub mod nn;
pub mod pipeline;
pub mod preproc;
pub mod render;
pub mod sensors;
pub mod utils;

pub use common::{
    detection::{Candidate, CenterBox, Detection, FrameReport},
    labels::LabelTable,
};

/// Prefix and suffix of a single part of a `multipart/x-mixed-replace` JPEG stream.
const MJPEG_PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const MJPEG_PART_FOOTER: &[u8] = b"\r\n\r\n";

/// Wrap an encoded JPEG as one part of an MJPEG stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> bytes::Bytes {
    bytes::Bytes::from([MJPEG_PART_HEADER, data, MJPEG_PART_FOOTER].concat())
}
