//! Single-pass landmark models (hands, pose, face mesh) behind one plugin type.
//!
//! The model sees the whole frame resized to a square NHWC tensor. Output 0 holds
//! `points * values_per_point` coordinates in input pixels per landmark group,
//! output 1 (optional) one presence score per group, output 2 (optional) one
//! handedness score per group. Single-instance models simply report one group.

use std::path::Path;

use ndarray::Array4;
use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::Session;
use ort::value::TensorRef;
use serde_json::Value;

use crate::assets::AssetResolver;
use crate::draw;
use crate::frame::Frame;
use crate::plugin::{
    timestamp_ms, BoxError, Detection, LandmarkGroup, LandmarkPoint, Plugin, PluginError,
    SettingSpec, Settings, UnifiedResult,
};

const SMOOTHING: f32 = 0.5;

/// Tracking is dropped when frames arrive further apart than this.
const TRACKING_GAP_MS: i64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct LandmarkModel {
    pub asset: &'static str,
    pub input_size: u32,
    pub points: usize,
    /// 3 for x/y/z, 5 when visibility and presence follow.
    pub values_per_point: usize,
}

/// Setting names a landmark plugin reads.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkSettingNames {
    pub max_groups: &'static str,
    pub detection: &'static str,
    pub presence: &'static str,
    pub tracking: &'static str,
}

/// Static description of one landmark plugin.
pub struct LandmarkDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub schema: &'static [SettingSpec],
    pub settings: LandmarkSettingNames,
    pub model: LandmarkModel,
    pub connections: &'static [(usize, usize)],
    pub count_key: &'static str,
    /// Builds the per-group detection, if this plugin reports any.
    pub detection: Option<fn(&LandmarkEstimate) -> Detection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkEstimate {
    pub points: Vec<LandmarkPoint>,
    pub presence: f32,
    pub handedness: Option<f32>,
}

impl LandmarkEstimate {
    pub fn handedness_label(&self) -> Option<&'static str> {
        self.handedness
            .map(|score| if score >= 0.5 { "Right" } else { "Left" })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Scores outside `[0, 1]` are treated as logits.
fn to_probability(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        sigmoid(raw)
    }
}

/// Converts a flat coordinate tensor into normalized points.
pub fn decode_points(
    flat: &[f32],
    model: &LandmarkModel,
) -> Result<Vec<LandmarkPoint>, BoxError> {
    let needed = model.points * model.values_per_point;
    if flat.len() < needed {
        return Err(format!(
            "landmark output too small: expected {needed} values, got {}",
            flat.len()
        )
        .into());
    }

    let scale = model.input_size as f32;
    let points = flat[..needed]
        .chunks_exact(model.values_per_point)
        .map(|v| LandmarkPoint {
            x: v[0] / scale,
            y: v[1] / scale,
            z: v[2] / scale,
            visibility: v.get(3).map(|&raw| sigmoid(raw)),
        })
        .collect();
    Ok(points)
}

/// Splits raw model outputs into one estimate per landmark group.
///
/// Missing presence scores count as certain; scores outside `[0, 1]` are logits.
pub fn decode_groups(
    coords: &[f32],
    presence: &[f32],
    handedness: &[f32],
    model: &LandmarkModel,
) -> Result<Vec<LandmarkEstimate>, BoxError> {
    let group_len = model.points * model.values_per_point;
    if group_len == 0 || coords.len() < group_len {
        return Err(format!(
            "landmark output too small: expected {group_len} values, got {}",
            coords.len()
        )
        .into());
    }

    (0..coords.len() / group_len)
        .map(|g| -> Result<LandmarkEstimate, BoxError> {
            Ok(LandmarkEstimate {
                points: decode_points(&coords[g * group_len..], model)?,
                presence: presence.get(g).copied().map_or(1.0, to_probability),
                handedness: handedness.get(g).copied().map(to_probability),
            })
        })
        .collect()
}

fn centroid(points: &[LandmarkPoint]) -> (f32, f32) {
    let n = points.len().max(1) as f32;
    let (x, y) = points.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
    (x / n, y / n)
}

/// Frame-to-frame exponential smoothing, the only temporal state a landmark plugin owns.
///
/// Each new group is paired with the nearest unclaimed group of the previous frame.
#[derive(Debug, Clone, Default)]
pub struct Smoother {
    previous: Vec<Vec<LandmarkPoint>>,
}

impl Smoother {
    pub fn is_tracking(&self) -> bool {
        !self.previous.is_empty()
    }

    /// `groups` pairs each point set with whether it may be blended.
    pub fn apply(&mut self, groups: Vec<(Vec<LandmarkPoint>, bool)>) -> Vec<Vec<LandmarkPoint>> {
        let mut claimed = vec![false; self.previous.len()];
        let smoothed: Vec<Vec<LandmarkPoint>> = groups
            .into_iter()
            .map(|(points, smooth)| {
                if !smooth {
                    return points;
                }
                let (cx, cy) = centroid(&points);
                let nearest = self
                    .previous
                    .iter()
                    .enumerate()
                    .filter(|(i, prev)| !claimed[*i] && prev.len() == points.len())
                    .map(|(i, prev)| {
                        let (px, py) = centroid(prev);
                        (i, (px - cx).powi(2) + (py - cy).powi(2))
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1));

                match nearest {
                    Some((i, _)) => {
                        claimed[i] = true;
                        points
                            .iter()
                            .zip(&self.previous[i])
                            .map(|(cur, old)| LandmarkPoint {
                                x: old.x + SMOOTHING * (cur.x - old.x),
                                y: old.y + SMOOTHING * (cur.y - old.y),
                                z: old.z + SMOOTHING * (cur.z - old.z),
                                visibility: cur.visibility,
                            })
                            .collect()
                    }
                    None => points,
                }
            })
            .collect();
        self.previous = smoothed.clone();
        smoothed
    }

    pub fn lost(&mut self) {
        self.previous.clear();
    }
}

/// An open landmark model session.
pub struct Landmarker {
    session: Session,
    model: LandmarkModel,
}

impl Landmarker {
    pub fn load(model: LandmarkModel, path: &Path) -> Result<Self, BoxError> {
        let session = super::open_session(path)?;
        Ok(Self { session, model })
    }

    pub fn estimate(&mut self, frame: &Mat) -> Result<Vec<LandmarkEstimate>, BoxError> {
        if frame.rows() == 0 || frame.cols() == 0 {
            return Ok(Vec::new());
        }

        let input = preprocess_nhwc(frame, self.model.input_size)?;
        let tensor_ref = TensorRef::from_array_view(input.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref])?;
        if outputs.len() == 0 {
            return Err("landmark model produced no outputs".into());
        }

        let mut flat = Vec::with_capacity(3);
        for i in 0..outputs.len().min(3) {
            let values: Vec<f32> = outputs[i].try_extract_array::<f32>()?.iter().copied().collect();
            flat.push(values);
        }
        drop(outputs);

        let empty = Vec::new();
        decode_groups(
            &flat[0],
            flat.get(1).unwrap_or(&empty),
            flat.get(2).unwrap_or(&empty),
            &self.model,
        )
    }
}

fn preprocess_nhwc(frame: &Mat, input_size: u32) -> Result<Array4<f32>, BoxError> {
    let side = input_size as i32;
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(side, side),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let data = resized.data_bytes()?;
    let side = input_size as usize;
    if data.len() < side * side * 3 {
        return Err("frame data too small".into());
    }

    let mut tensor = Array4::<f32>::zeros((1, side, side, 3));
    for y in 0..side {
        for x in 0..side {
            let idx = (y * side + x) * 3;
            // BGR in, RGB out
            tensor[[0, y, x, 0]] = data[idx + 2] as f32 / 255.0;
            tensor[[0, y, x, 1]] = data[idx + 1] as f32 / 255.0;
            tensor[[0, y, x, 2]] = data[idx] as f32 / 255.0;
        }
    }
    Ok(tensor)
}

struct Thresholds {
    max_groups: usize,
    detection: f32,
    presence: f32,
    tracking: f32,
}

/// Plugin over a [`Landmarker`] configured by a [`LandmarkDescriptor`].
pub struct LandmarkPlugin {
    descriptor: &'static LandmarkDescriptor,
    session: Option<Landmarker>,
    smoother: Smoother,
    thresholds: Thresholds,
    last_ms: Option<i64>,
}

impl LandmarkPlugin {
    pub fn new(descriptor: &'static LandmarkDescriptor) -> Self {
        Self {
            descriptor,
            session: None,
            smoother: Smoother::default(),
            thresholds: Thresholds {
                max_groups: 1,
                detection: 0.5,
                presence: 0.5,
                tracking: 0.5,
            },
            last_ms: None,
        }
    }

    fn configure(&mut self, settings: &Settings) {
        let names = &self.descriptor.settings;
        self.thresholds = Thresholds {
            max_groups: settings.usize_or(names.max_groups, 1).max(1),
            detection: settings.f32_or(names.detection, 0.5),
            presence: settings.f32_or(names.presence, 0.5),
            tracking: settings.f32_or(names.tracking, 0.5),
        };
    }

    /// Drops tracking across long gaps and when time runs backwards.
    fn advance_clock(&mut self, now_ms: i64) {
        if let Some(last) = self.last_ms {
            if now_ms < last {
                tracing::warn!(
                    plugin = %self.descriptor.id,
                    last_ms = last,
                    now_ms,
                    "timestamp went backwards, tracking reset"
                );
                self.smoother.lost();
            } else if now_ms - last > TRACKING_GAP_MS {
                self.smoother.lost();
            }
        }
        self.last_ms = Some(now_ms);
    }

    /// Gate, rank and smooth raw estimates. Fresh detections are held to the
    /// detection threshold, tracked ones to the presence threshold; at most
    /// `max_groups` survive, most confident first.
    fn accept(&mut self, estimates: Vec<LandmarkEstimate>) -> Vec<LandmarkEstimate> {
        let gate = if self.smoother.is_tracking() {
            self.thresholds.presence
        } else {
            self.thresholds.detection
        };

        let mut kept: Vec<LandmarkEstimate> =
            estimates.into_iter().filter(|e| e.presence >= gate).collect();
        kept.sort_by(|a, b| b.presence.total_cmp(&a.presence));
        kept.truncate(self.thresholds.max_groups);
        if kept.is_empty() {
            self.smoother.lost();
            return kept;
        }

        let tracking = self.thresholds.tracking;
        let groups = kept
            .iter_mut()
            .map(|e| (std::mem::take(&mut e.points), e.presence >= tracking))
            .collect();
        for (estimate, points) in kept.iter_mut().zip(self.smoother.apply(groups)) {
            estimate.points = points;
        }
        kept
    }
}

impl Plugin for LandmarkPlugin {
    fn plugin_id(&self) -> &'static str {
        self.descriptor.id
    }

    fn display_name(&self) -> &'static str {
        self.descriptor.display_name
    }

    fn settings_schema(&self) -> &'static [SettingSpec] {
        self.descriptor.schema
    }

    fn init(&mut self, settings: &Settings, assets: &AssetResolver) -> Result<(), PluginError> {
        self.close();
        self.configure(settings);

        let path = assets.resolve(self.descriptor.model.asset)?;
        let session = Landmarker::load(self.descriptor.model, &path).map_err(PluginError::Model)?;
        self.session = Some(session);

        tracing::debug!(
            plugin = %self.descriptor.id,
            model = %self.descriptor.model.asset,
            max_groups = self.thresholds.max_groups,
            "landmark session opened"
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
            .ok_or(PluginError::NotInitialized(self.descriptor.id))?;

        let mut mat = frame.to_mat()?;
        let raw = session.estimate(&mat).map_err(PluginError::Model)?;
        self.advance_clock(timestamp_ms(timestamp_s));
        let accepted = self.accept(raw);

        let mut landmarks: Vec<LandmarkGroup> = Vec::new();
        let mut detections = Vec::new();
        for estimate in &accepted {
            draw::draw_landmarks(&mut mat, &estimate.points, self.descriptor.connections, draw::GREEN)?;
            if let Some(build) = self.descriptor.detection {
                detections.push(build(estimate));
            }
            landmarks.push(estimate.points.clone());
        }

        let result = UnifiedResult::new(self.descriptor.id, timestamp_s)
            .with_metadata(self.descriptor.count_key, Value::from(landmarks.len()))
            .with_detections(detections)
            .with_landmarks(landmarks);

        Ok((Frame::from_mat(&mat)?, result))
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(plugin = %self.descriptor.id, "landmark session closed");
        }
        self.smoother.lost();
        self.last_ms = None;
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}
