use serde_json::Value;

use super::landmarker::{
    LandmarkDescriptor, LandmarkEstimate, LandmarkModel, LandmarkPlugin, LandmarkSettingNames,
};
use crate::plugin::{Detection, Plugin, PluginError, SettingSpec};

pub(crate) const HAND_MODEL: LandmarkModel = LandmarkModel {
    asset: "handpose_estimation_mediapipe_2023feb.onnx",
    input_size: 224,
    points: 21,
    values_per_point: 3,
};

pub(crate) const HAND_SCHEMA: &[SettingSpec] = &[
    SettingSpec::int("num_hands", "Max hands", 1, 4, 2),
    SettingSpec::float("min_hand_detection_confidence", "Min hand detection confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_hand_presence_confidence", "Min hand presence confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_tracking_confidence", "Min tracking confidence", 0.0, 1.0, 0.5),
];

pub(crate) const HAND_SETTINGS: LandmarkSettingNames = LandmarkSettingNames {
    max_groups: "num_hands",
    detection: "min_hand_detection_confidence",
    presence: "min_hand_presence_confidence",
    tracking: "min_tracking_confidence",
};

/// Wrist is 0; each finger runs base to tip.
pub(crate) const HAND_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (5, 9), (9, 10), (10, 11), (11, 12),
    (9, 13), (13, 14), (14, 15), (15, 16),
    (13, 17), (0, 17), (17, 18), (18, 19), (19, 20),
];

pub(crate) fn with_handedness(detection: Detection, estimate: &LandmarkEstimate) -> Detection {
    match estimate.handedness_label() {
        Some(side) => detection.with_attribute("handedness", Value::from(side)),
        None => detection,
    }
}

fn hand_detection(estimate: &LandmarkEstimate) -> Detection {
    with_handedness(Detection::new("hand", estimate.presence), estimate)
}

static HANDS: LandmarkDescriptor = LandmarkDescriptor {
    id: "hands",
    display_name: "Hands",
    schema: HAND_SCHEMA,
    settings: HAND_SETTINGS,
    model: HAND_MODEL,
    connections: HAND_CONNECTIONS,
    count_key: "num_hands",
    detection: Some(hand_detection),
};

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(LandmarkPlugin::new(&HANDS)))
}
