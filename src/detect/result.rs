use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel units of the input image, top-left origin.
///
/// Serialized as `[x, y, w, h]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates, clamping inverted corners to an empty box.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One predicted object instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Result of running detection on a frame.
///
/// Detection order is whatever the engine produced; filters only drop or truncate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    #[serde(rename = "time_ms")]
    pub elapsed_ms: f64,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Class allow-list as supplied by a caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassFilter {
    Ids(BTreeSet<usize>),
    /// Label names, resolved against the active label set at request time.
    Names(Vec<String>),
}

impl ClassFilter {
    /// Parse a comma-separated list of label names, ignoring blanks.
    pub fn from_csv(value: &str) -> Option<Self> {
        let names: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(Self::Names(names))
        }
    }
}

/// Per-request knobs. `None` always means "engine default", never zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceParams {
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub max_results: Option<usize>,
    pub class_filter: Option<ClassFilter>,
    pub min_area_ratio: Option<f32>,
}

/// Numeric parameters handed to an engine once label names are resolved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineParams {
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub classes: Option<BTreeSet<usize>>,
}
