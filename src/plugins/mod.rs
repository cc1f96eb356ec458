//! Built-in analysis plugins and their registration tables.

pub mod face_detector;
pub mod facemesh;
pub mod gesture;
pub mod hands;
pub mod landmarker;
pub mod motion;
pub mod object_detector;
pub mod pose;

use std::path::Path;

use ort::session::{builder::GraphOptimizationLevel, Session};

use crate::plugin::{BoxError, PluginRegistration};

/// Registered first, in this order.
pub const BUILTIN_PLUGINS: &[PluginRegistration] = &[
    PluginRegistration::new("hands", hands::create),
    PluginRegistration::new("pose", pose::create),
    PluginRegistration::new("facemesh", facemesh::create),
    PluginRegistration::new("object_detector", object_detector::create),
    PluginRegistration::new("face_detector", face_detector::create),
    PluginRegistration::new("gesture_recognizer", gesture::create),
];

/// Additional self-registering plugins, appended after the built-ins.
pub const EXTRA_PLUGINS: &[PluginRegistration] = &[PluginRegistration::new("motion", motion::create)];

pub(crate) fn open_session(path: &Path) -> Result<Session, BoxError> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetError, AssetResolver};
    use crate::config::AssetsConfig;

    #[test]
    fn test_default_sources_cover_public_models() {
        let resolver = AssetResolver::new(&AssetsConfig::default());
        for asset in [
            hands::HAND_MODEL.asset,
            pose::POSE_MODEL.asset,
            face_detector::MODEL_ASSET,
        ] {
            assert!(resolver.has_source(asset), "{asset} has no download source");
        }
    }

    #[test]
    fn test_user_supplied_models_name_themselves_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = AssetsConfig {
            cache_dir: dir.path().to_path_buf(),
            ..AssetsConfig::default()
        };
        let resolver = AssetResolver::new(&config);
        for asset in [facemesh::FACE_MESH_MODEL.asset, object_detector::MODEL_ASSET] {
            match resolver.resolve(asset) {
                Err(AssetError::Unknown { name, known }) => {
                    assert_eq!(name, asset);
                    assert!(known.iter().any(|k| k == hands::HAND_MODEL.asset));
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }
}
