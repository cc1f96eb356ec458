use super::landmarker::{LandmarkDescriptor, LandmarkModel, LandmarkPlugin, LandmarkSettingNames};
use crate::plugin::{Plugin, PluginError, SettingSpec};

const FACE_MESH_SCHEMA: &[SettingSpec] = &[
    SettingSpec::int("num_faces", "Max faces", 1, 4, 1),
    SettingSpec::float("min_face_detection_confidence", "Min face detection confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_face_presence_confidence", "Min face presence confidence", 0.0, 1.0, 0.5),
    SettingSpec::float("min_tracking_confidence", "Min tracking confidence", 0.0, 1.0, 0.5),
];

/// No public ONNX export; supply it in the cache or under `[assets.models]`.
pub(crate) const FACE_MESH_MODEL: LandmarkModel = LandmarkModel {
    asset: "face_landmark.onnx",
    input_size: 192,
    points: 468,
    values_per_point: 3,
};

/// Mesh is drawn as points only.
static FACE_MESH: LandmarkDescriptor = LandmarkDescriptor {
    id: "facemesh",
    display_name: "Face Mesh",
    schema: FACE_MESH_SCHEMA,
    settings: LandmarkSettingNames {
        max_groups: "num_faces",
        detection: "min_face_detection_confidence",
        presence: "min_face_presence_confidence",
        tracking: "min_tracking_confidence",
    },
    model: FACE_MESH_MODEL,
    connections: &[],
    count_key: "num_faces",
    detection: None,
};

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(LandmarkPlugin::new(&FACE_MESH)))
}
