use super::landmarker::{LandmarkDescriptor, LandmarkModel, LandmarkPlugin, LandmarkSettingNames};
use crate::plugin::{Plugin, PluginError, SettingSpec};

/// 39 points come out of the model; the last six are auxiliary and skipped.
pub(crate) const POSE_MODEL: LandmarkModel = LandmarkModel {
    asset: "pose_estimation_mediapipe_2023mar.onnx",
    input_size: 256,
    points: 33,
    values_per_point: 5,
};

const POSE_SCHEMA: &[SettingSpec] = &[
    SettingSpec::int("num_poses", "Max poses", 1, 4, 1),
    SettingSpec::float("min_pose_detection_confidence", "Min pose detection confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_pose_presence_confidence", "Min pose presence confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_tracking_confidence", "Min tracking confidence", 0.0, 1.0, 0.5),
];

// face, torso, arms, legs
const POSE_CONNECTIONS: &[(usize, usize)] = &[
    (0, 1), (1, 2), (2, 3), (3, 7), (0, 4), (4, 5), (5, 6), (6, 8), (9, 10),
    (11, 12), (11, 23), (12, 24), (23, 24),
    (11, 13), (13, 15), (15, 17), (15, 19), (15, 21), (17, 19),
    (12, 14), (14, 16), (16, 18), (16, 20), (16, 22), (18, 20),
    (23, 25), (25, 27), (27, 29), (27, 31), (29, 31),
    (24, 26), (26, 28), (28, 30), (28, 32), (30, 32),
];

static POSE: LandmarkDescriptor = LandmarkDescriptor {
    id: "pose",
    display_name: "Pose",
    schema: POSE_SCHEMA,
    settings: LandmarkSettingNames {
        max_groups: "num_poses",
        detection: "min_pose_detection_confidence",
        presence: "min_pose_presence_confidence",
        tracking: "min_tracking_confidence",
    },
    model: POSE_MODEL,
    connections: POSE_CONNECTIONS,
    count_key: "num_poses",
    detection: None,
};

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(LandmarkPlugin::new(&POSE)))
}
