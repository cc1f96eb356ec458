use ndarray::{Array4, ArrayViewD};
use opencv::core::{Mat, Point, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::Session;
use ort::value::TensorRef;
use serde_json::Value;

use crate::assets::AssetResolver;
use crate::draw;
use crate::frame::Frame;
use crate::plugin::{
    BoundingBox, BoxError, Detection, Plugin, PluginError, SettingSpec, Settings, UnifiedResult,
};

const PLUGIN_ID: &str = "object_detector";
pub(crate) const MODEL_ASSET: &str = "yolo26n.onnx";
const INPUT_SIZE: u32 = 640;

const SCHEMA: &[SettingSpec] = &[
    SettingSpec::int("max_results", "Max results", 1, 20, 5),
    SettingSpec::float("score_threshold", "Score threshold", 0.0, 1.0, 0.3),
];

const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Maps model-input pixels back to frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    frame_w: f32,
    frame_h: f32,
}

impl Letterbox {
    fn for_frame(cols: i32, rows: i32) -> Self {
        let input = INPUT_SIZE as f32;
        let (frame_w, frame_h) = (cols as f32, rows as f32);
        let scale = (input / frame_w).min(input / frame_h);
        let new_w = (frame_w * scale).round() as i32;
        let new_h = (frame_h * scale).round() as i32;
        Self {
            scale,
            pad_x: ((INPUT_SIZE as i32 - new_w) / 2) as f32,
            pad_y: ((INPUT_SIZE as i32 - new_h) / 2) as f32,
            frame_w,
            frame_h,
        }
    }

    /// `(cx, cy, w, h)` normalized to the model input, to a clamped frame box.
    fn to_frame(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let input = INPUT_SIZE as f32;
        let (cx, cy, w, h) = (cx * input, cy * input, w * input, h * input);

        let x = (((cx - w / 2.0) - self.pad_x) / self.scale).clamp(0.0, self.frame_w);
        let y = (((cy - h / 2.0) - self.pad_y) / self.scale).clamp(0.0, self.frame_h);
        BoundingBox {
            origin_x: x,
            origin_y: y,
            width: (w / self.scale).min(self.frame_w - x),
            height: (h / self.scale).min(self.frame_h - y),
        }
    }
}

fn class_name(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// Decodes YOLO26 `logits [1, N, C]` and `pred_boxes [1, N, 4]` into detections
/// at or above `threshold`, best first, at most `max_results`.
fn postprocess(
    logits: &ArrayViewD<f32>,
    boxes: &ArrayViewD<f32>,
    letterbox: &Letterbox,
    threshold: f32,
    max_results: usize,
) -> Result<Vec<Detection>, BoxError> {
    let logits_shape = logits.shape();
    if logits_shape.len() < 2 || boxes.shape().len() < 2 {
        return Ok(Vec::new());
    }

    let (num_queries, num_classes) = if logits_shape.len() == 3 {
        (logits_shape[1], logits_shape[2])
    } else {
        (logits_shape[0], logits_shape[1])
    };

    let logits_flat = logits.as_slice().ok_or("logits not contiguous")?;
    let boxes_flat = boxes.as_slice().ok_or("boxes not contiguous")?;
    if logits_flat.len() < num_queries * num_classes || boxes_flat.len() < num_queries * 4 {
        return Err("model outputs shorter than their shape".into());
    }

    let mut detections = Vec::new();
    for i in 0..num_queries {
        let row = &logits_flat[i * num_classes..(i + 1) * num_classes];
        let Some((class_id, logit)) = row
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };

        let score = 1.0 / (1.0 + (-logit).exp());
        if score < threshold {
            continue;
        }

        let b = &boxes_flat[i * 4..i * 4 + 4];
        detections.push(
            Detection::new(class_name(class_id), score)
                .with_bbox(letterbox.to_frame(b[0], b[1], b[2], b[3]))
                .with_attribute("class_id", Value::from(class_id)),
        );
    }

    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    detections.truncate(max_results);
    Ok(detections)
}

fn preprocess(frame: &Mat, letterbox: &Letterbox) -> Result<Array4<f32>, BoxError> {
    let new_w = (letterbox.frame_w * letterbox.scale).round() as i32;
    let new_h = (letterbox.frame_h * letterbox.scale).round() as i32;
    let side = INPUT_SIZE as i32;

    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(new_w, new_h),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let (pad_x, pad_y) = (letterbox.pad_x as i32, letterbox.pad_y as i32);
    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        side - new_h - pad_y,
        pad_x,
        side - new_w - pad_x,
        BORDER_CONSTANT,
        Scalar::new(114.0, 114.0, 114.0, 0.0),
    )?;

    let data = padded.data_bytes()?;
    let side = INPUT_SIZE as usize;
    if data.len() < side * side * 3 {
        return Err("frame data too small".into());
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for y in 0..side {
        for x in 0..side {
            let idx = (y * side + x) * 3;
            tensor[[0, 0, y, x]] = data[idx + 2] as f32 / 255.0;
            tensor[[0, 1, y, x]] = data[idx + 1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = data[idx] as f32 / 255.0;
        }
    }
    Ok(tensor)
}

/// COCO object detection over a YOLO26 ONNX session.
pub struct ObjectDetectorPlugin {
    session: Option<Session>,
    max_results: usize,
    score_threshold: f32,
}

impl ObjectDetectorPlugin {
    pub fn new() -> Self {
        Self {
            session: None,
            max_results: 5,
            score_threshold: 0.3,
        }
    }

    fn detect(
        session: &mut Session,
        frame: &Mat,
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<Detection>, BoxError> {
        if frame.rows() == 0 || frame.cols() == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::for_frame(frame.cols(), frame.rows());
        let input = preprocess(frame, &letterbox)?;
        let tensor_ref = TensorRef::from_array_view(input.view())?.into_dyn();
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (Some(logits), Some(boxes)) = (outputs.get("logits"), outputs.get("pred_boxes")) else {
            return Err("expected 'logits' and 'pred_boxes' outputs".into());
        };
        let logits = logits.try_extract_array::<f32>()?.to_owned();
        let boxes = boxes.try_extract_array::<f32>()?.to_owned();
        drop(outputs);

        postprocess(&logits.view(), &boxes.view(), &letterbox, threshold, max_results)
    }
}

impl Default for ObjectDetectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ObjectDetectorPlugin {
    fn plugin_id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn display_name(&self) -> &'static str {
        "Object Detector"
    }

    fn settings_schema(&self) -> &'static [SettingSpec] {
        SCHEMA
    }

    fn init(&mut self, settings: &Settings, assets: &AssetResolver) -> Result<(), PluginError> {
        self.close();
        self.max_results = settings.usize_or("max_results", 5);
        self.score_threshold = settings.f32_or("score_threshold", 0.3);

        let path = assets.resolve(MODEL_ASSET)?;
        let session = super::open_session(&path).map_err(PluginError::Model)?;
        self.session = Some(session);

        tracing::info!(
            model = %path.display(),
            score_threshold = self.score_threshold,
            max_results = self.max_results,
            "object detector loaded"
        );
        Ok(())
    }

    fn process(
        &mut self,
        frame: &Frame,
        timestamp_s: f64,
    ) -> Result<(Frame, UnifiedResult), PluginError> {
        let session = self
            .session
            .as_mut()
            .ok_or(PluginError::NotInitialized(PLUGIN_ID))?;

        let mut mat = frame.to_mat()?;
        let detections = Self::detect(session, &mat, self.score_threshold, self.max_results)
            .map_err(PluginError::Model)?;

        for det in &detections {
            if let Some(bbox) = &det.bbox {
                draw::draw_box(&mut mat, bbox, draw::GREEN)?;
                let anchor = Point::new(bbox.origin_x as i32, bbox.origin_y as i32);
                let text = format!("{} {:.0}%", det.label, det.score * 100.0);
                draw::draw_label(&mut mat, &text, anchor, draw::GREEN)?;
            }
        }

        let result = UnifiedResult::new(PLUGIN_ID, timestamp_s)
            .with_metadata("num_detections", Value::from(detections.len()))
            .with_detections(detections);
        Ok((Frame::from_mat(&mat)?, result))
    }

    fn close(&mut self) {
        self.session = None;
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(ObjectDetectorPlugin::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};

    fn outputs(queries: &[(usize, f32, [f32; 4])]) -> (ndarray::ArrayD<f32>, ndarray::ArrayD<f32>) {
        let n = queries.len();
        let mut logits = Array3::<f32>::from_elem((1, n, 80), -10.0);
        let mut boxes = Array3::<f32>::zeros((1, n, 4));
        for (i, (class_id, logit, b)) in queries.iter().enumerate() {
            logits[[0, i, *class_id]] = *logit;
            for (k, v) in b.iter().enumerate() {
                boxes[[0, i, k]] = *v;
            }
        }
        (logits.into_dyn(), boxes.into_dyn())
    }

    #[test]
    fn test_letterbox_square_frame_has_no_padding() {
        let lb = Letterbox::for_frame(640, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 0.0));

        let bbox = lb.to_frame(0.5, 0.5, 0.25, 0.25);
        assert_eq!(bbox.origin_x, 240.0);
        assert_eq!(bbox.origin_y, 240.0);
        assert_eq!(bbox.width, 160.0);
        assert_eq!(bbox.height, 160.0);
    }

    #[test]
    fn test_letterbox_wide_frame_pads_vertically() {
        let lb = Letterbox::for_frame(1280, 720);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);

        // box touching the top padding clamps to the frame
        let bbox = lb.to_frame(0.1, 0.0, 0.1, 0.1);
        assert_eq!(bbox.origin_y, 0.0);
    }

    #[test]
    fn test_postprocess_filters_sorts_truncates() {
        let (logits, boxes) = outputs(&[
            (0, 0.0, [0.5, 0.5, 0.1, 0.1]),  // person, 0.5
            (2, 3.0, [0.2, 0.5, 0.1, 0.1]),  // car, ~0.95
            (16, -3.0, [0.7, 0.5, 0.1, 0.1]), // dog, ~0.05
            (15, 1.0, [0.8, 0.5, 0.1, 0.1]), // cat, ~0.73
        ]);
        let lb = Letterbox::for_frame(640, 640);

        let all = postprocess(&logits.view(), &boxes.view(), &lb, 0.3, 20).unwrap();
        let labels: Vec<_> = all.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["car", "cat", "person"]);
        assert!(all.iter().all(|d| d.score >= 0.3));
        assert_eq!(all[0].attributes.get("class_id"), Some(&Value::from(2)));

        let top = postprocess(&logits.view(), &boxes.view(), &lb, 0.3, 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].label, "car");
    }

    #[test]
    fn test_postprocess_unexpected_shape_is_empty() {
        let flat = ndarray::ArrayD::<f32>::zeros(IxDyn(&[4]));
        let lb = Letterbox::for_frame(640, 480);
        let dets = postprocess(&flat.view(), &flat.view(), &lb, 0.1, 5).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn test_class_name_fallback() {
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(79), "toothbrush");
        assert_eq!(class_name(80), "class_80");
    }

    #[test]
    fn test_process_before_init() {
        let mut plugin = ObjectDetectorPlugin::new();
        let err = plugin.process(&Frame::black(8, 8), 0.0).unwrap_err();
        assert!(matches!(err, PluginError::NotInitialized(PLUGIN_ID)));
    }
}
