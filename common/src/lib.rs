//! Common code shared by the detection pipeline: boxes, detections and class labels.
pub mod detection;
pub mod labels;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
