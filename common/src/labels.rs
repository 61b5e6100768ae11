//! Class label table.
//!
use std::{fs, path::Path};

use lazy_static::lazy_static;

use crate::Error;

/// Name returned for class indices outside of the table.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Class names of the COCO dataset, in model output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

lazy_static! {
    static ref COCO: LabelTable = LabelTable {
        labels: COCO_CLASSES.iter().map(|&name| name.to_owned()).collect(),
    };
}

/// Ordered, read-only list of class names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// The built-in COCO table.
    pub fn coco() -> Self {
        COCO.clone()
    }

    /// Parse a JSON array of class names.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let labels: Vec<String> = serde_json::from_str(json)?;
        if labels.is_empty() {
            return Err("label table is empty".into());
        }

        Ok(Self { labels })
    }

    /// Read a JSON label file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|err| format!("failed to read label file {}: {err}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    /// Class name, or [`UNKNOWN_LABEL`] for indices past the end of the table.
    pub fn name(&self, class_id: usize) -> &str {
        self.get(class_id).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::coco()
    }
}
