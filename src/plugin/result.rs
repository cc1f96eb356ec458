use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Axis-aligned box. Units (pixels or normalized) are chosen by the producing plugin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Plugin-specific attributes, e.g. `handedness`.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
            bbox: None,
            attributes: Map::new(),
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
        }
    }
}

pub type LandmarkGroup = Vec<LandmarkPoint>;

/// Output record shared by every plugin.
///
/// `detections` and `landmarks` are always serialized, empty or not. The record is
/// assembled with the `with_*` builders and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResult {
    pipeline: String,
    timestamp_s: f64,
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    landmarks: Vec<LandmarkGroup>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl UnifiedResult {
    pub fn new(pipeline: impl Into<String>, timestamp_s: f64) -> Self {
        Self {
            pipeline: pipeline.into(),
            timestamp_s,
            detections: Vec::new(),
            landmarks: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Vec<LandmarkGroup>) -> Self {
        self.landmarks = landmarks;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn timestamp_s(&self) -> f64 {
        self.timestamp_s
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn landmarks(&self) -> &[LandmarkGroup] {
        &self.landmarks
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// One-paragraph description for logs and export.
    pub fn summary(&self) -> String {
        format!(
            "pipeline: {}, timestamp: {:.3}s, detections: {}, landmark groups: {}",
            self.pipeline,
            self.timestamp_s,
            self.detections.len(),
            self.landmarks.len()
        )
    }
}
