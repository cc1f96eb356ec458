use opencv::core::{self, Mat, Point, Ptr, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::video::{self, BackgroundSubtractorMOG2, BackgroundSubtractorTrait};
use serde_json::Value;

use crate::assets::AssetResolver;
use crate::draw;
use crate::frame::Frame;
use crate::plugin::{BoundingBox, Detection, Plugin, PluginError, SettingSpec, Settings, UnifiedResult};

const PLUGIN_ID: &str = "motion";

/// MOG2 marks shadows 127 and foreground 255.
const FOREGROUND_LEVEL: f64 = 200.0;

const SCHEMA: &[SettingSpec] = &[
    SettingSpec::int("history", "History (frames)", 10, 2000, 500),
    SettingSpec::float("var_threshold", "Variance threshold", 1.0, 100.0, 16.0),
    SettingSpec::float("min_motion_score", "Min motion score", 0.0, 1.0, 0.05),
];

/// Foreground ratio scaled so that a tenth of the frame moving saturates at 1.0.
pub fn motion_score(foreground: i32, total: i32) -> f32 {
    if total <= 0 {
        return 0.0;
    }
    (foreground as f32 / total as f32 * 10.0).min(1.0)
}

/// Background-subtraction motion detector.
pub struct MotionPlugin {
    mog2: Option<Ptr<BackgroundSubtractorMOG2>>,
    fg_mask: Mat,
    min_motion_score: f32,
}

impl MotionPlugin {
    pub fn new() -> Self {
        Self {
            mog2: None,
            fg_mask: Mat::default(),
            min_motion_score: 0.05,
        }
    }

    /// Bounding box of foreground pixels, if any.
    fn foreground_box(&self) -> opencv::Result<Option<BoundingBox>> {
        let mut binary = Mat::default();
        imgproc::threshold(&self.fg_mask, &mut binary, FOREGROUND_LEVEL, 255.0, imgproc::THRESH_BINARY)?;

        let mut points: Vector<Point> = Vector::new();
        core::find_non_zero(&binary, &mut points)?;
        if points.is_empty() {
            return Ok(None);
        }

        let rect = imgproc::bounding_rect(&points)?;
        Ok(Some(BoundingBox {
            origin_x: rect.x as f32,
            origin_y: rect.y as f32,
            width: rect.width as f32,
            height: rect.height as f32,
        }))
    }
}

impl Default for MotionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for MotionPlugin {
    fn plugin_id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn display_name(&self) -> &'static str {
        "Motion"
    }

    fn settings_schema(&self) -> &'static [SettingSpec] {
        SCHEMA
    }

    fn init(&mut self, settings: &Settings, _assets: &AssetResolver) -> Result<(), PluginError> {
        self.close();

        let history = settings.usize_or("history", 500) as i32;
        let var_threshold = settings.f32_or("var_threshold", 16.0) as f64;
        self.min_motion_score = settings.f32_or("min_motion_score", 0.05);
        self.mog2 = Some(video::create_background_subtractor_mog2(history, var_threshold, true)?);

        tracing::debug!(history, var_threshold, "motion detector ready");
        Ok(())
    }

    fn process(
        &mut self,
        frame: &Frame,
        timestamp_s: f64,
    ) -> Result<(Frame, UnifiedResult), PluginError> {
        let mog2 = self
            .mog2
            .as_mut()
            .ok_or(PluginError::NotInitialized(PLUGIN_ID))?;

        let mut mat = frame.to_mat()?;
        BackgroundSubtractorTrait::apply(mog2, &mat, &mut self.fg_mask, -1.0)?;

        let total = self.fg_mask.rows() * self.fg_mask.cols();
        let foreground = if total > 0 {
            core::count_non_zero(&self.fg_mask)?
        } else {
            0
        };
        let score = motion_score(foreground, total);

        let mut detections = Vec::new();
        if score > 0.0 && score >= self.min_motion_score {
            if let Some(bbox) = self.foreground_box()? {
                draw::draw_box(&mut mat, &bbox, draw::RED)?;
                detections.push(Detection::new("motion", score).with_bbox(bbox));
            }
        }

        let result = UnifiedResult::new(PLUGIN_ID, timestamp_s)
            .with_metadata("motion_score", Value::from(score))
            .with_detections(detections);
        Ok((Frame::from_mat(&mat)?, result))
    }

    fn close(&mut self) {
        self.mog2 = None;
        self.fg_mask = Mat::default();
    }

    fn is_initialized(&self) -> bool {
        self.mog2.is_some()
    }
}

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(MotionPlugin::new()))
}
