use opencv::core::{Mat, Point, Ptr, Size};
use opencv::objdetect::FaceDetectorYN;
use opencv::prelude::*;
use serde_json::Value;

use crate::assets::AssetResolver;
use crate::draw;
use crate::frame::Frame;
use crate::plugin::{BoundingBox, Detection, Plugin, PluginError, SettingSpec, Settings, UnifiedResult};

const PLUGIN_ID: &str = "face_detector";
pub(crate) const MODEL_ASSET: &str = "face_detection_yunet_2023mar.onnx";
const TOP_K: i32 = 5000;

/// x, y, w, h, five (x, y) keypoints, score.
const FACE_ROW_LEN: usize = 15;

const SCHEMA: &[SettingSpec] = &[
    SettingSpec::float("min_detection_confidence", "Min detection confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_suppression_threshold", "Min suppression threshold", 0.0, 1.0, 0.3),
];

fn face_detection(row: &[f32; FACE_ROW_LEN]) -> Detection {
    let keypoints: Vec<Value> = row[4..14]
        .chunks_exact(2)
        .map(|kp| Value::from(vec![kp[0], kp[1]]))
        .collect();

    Detection::new("face", row[14])
        .with_bbox(BoundingBox {
            origin_x: row[0],
            origin_y: row[1],
            width: row[2],
            height: row[3],
        })
        .with_attribute("keypoints", Value::from(keypoints))
}

fn face_rows(faces: &Mat) -> opencv::Result<Vec<[f32; FACE_ROW_LEN]>> {
    if faces.empty() || (faces.cols() as usize) < FACE_ROW_LEN {
        return Ok(Vec::new());
    }

    let mut rows = Vec::with_capacity(faces.rows() as usize);
    for r in 0..faces.rows() {
        let mut row = [0.0f32; FACE_ROW_LEN];
        for (c, value) in row.iter_mut().enumerate() {
            *value = *faces.at_2d::<f32>(r, c as i32)?;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// YuNet face detection through OpenCV's DNN backend.
pub struct FaceDetectorPlugin {
    detector: Option<Ptr<FaceDetectorYN>>,
    input_size: Size,
}

impl FaceDetectorPlugin {
    pub fn new() -> Self {
        Self {
            detector: None,
            input_size: Size::new(0, 0),
        }
    }
}

impl Default for FaceDetectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for FaceDetectorPlugin {
    fn plugin_id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn display_name(&self) -> &'static str {
        "Face Detector"
    }

    fn settings_schema(&self) -> &'static [SettingSpec] {
        SCHEMA
    }

    fn init(&mut self, settings: &Settings, assets: &AssetResolver) -> Result<(), PluginError> {
        self.close();

        let path = assets.resolve(MODEL_ASSET)?;
        let model = path
            .to_str()
            .ok_or_else(|| PluginError::model(format!("non utf-8 model path {}", path.display())))?;

        let score = settings.f32_or("min_detection_confidence", 0.5);
        let nms = settings.f32_or("min_suppression_threshold", 0.3);
        self.input_size = Size::new(320, 320);
        let detector = FaceDetectorYN::create(model, "", self.input_size, score, nms, TOP_K, 0, 0)?;
        self.detector = Some(detector);

        tracing::info!(model = %model, score_threshold = score, nms_threshold = nms, "face detector loaded");
        Ok(())
    }

    fn process(
        &mut self,
        frame: &Frame,
        timestamp_s: f64,
    ) -> Result<(Frame, UnifiedResult), PluginError> {
        let detector = self
            .detector
            .as_mut()
            .ok_or(PluginError::NotInitialized(PLUGIN_ID))?;

        let mut mat = frame.to_mat()?;
        let size = Size::new(mat.cols(), mat.rows());
        if size != self.input_size {
            detector.set_input_size(size)?;
            self.input_size = size;
        }

        let mut faces = Mat::default();
        detector.detect(&mat, &mut faces)?;

        let detections: Vec<Detection> = face_rows(&faces)?.iter().map(face_detection).collect();
        for det in &detections {
            if let Some(bbox) = &det.bbox {
                draw::draw_box(&mut mat, bbox, draw::YELLOW)?;
                let anchor = Point::new(bbox.origin_x as i32, bbox.origin_y as i32);
                draw::draw_label(&mut mat, &format!("face {:.2}", det.score), anchor, draw::YELLOW)?;
            }
        }

        let result = UnifiedResult::new(PLUGIN_ID, timestamp_s)
            .with_metadata("num_faces", Value::from(detections.len()))
            .with_detections(detections);
        Ok((Frame::from_mat(&mat)?, result))
    }

    fn close(&mut self) {
        self.detector = None;
    }

    fn is_initialized(&self) -> bool {
        self.detector.is_some()
    }
}

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(FaceDetectorPlugin::new()))
}
