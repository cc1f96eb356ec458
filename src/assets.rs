use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::AssetsConfig;

/// Models with a well-known public download location.
const BUILTIN_SOURCES: &[(&str, &str)] = &[
    (
        "face_detection_yunet_2023mar.onnx",
        "https://github.com/opencv/opencv_zoo/raw/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx",
    ),
    (
        "handpose_estimation_mediapipe_2023feb.onnx",
        "https://github.com/opencv/opencv_zoo/raw/main/models/handpose_estimation_mediapipe/handpose_estimation_mediapipe_2023feb.onnx",
    ),
    (
        "pose_estimation_mediapipe_2023mar.onnx",
        "https://github.com/opencv/opencv_zoo/raw/main/models/pose_estimation_mediapipe/pose_estimation_mediapipe_2023mar.onnx",
    ),
];

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("unknown model '{name}', known: {known:?}")]
    Unknown { name: String, known: Vec<String> },
    #[error("invalid model name '{0}'")]
    InvalidName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to download '{name}': {source}")]
    Download {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Resolves model names to local files, downloading unknown-but-listed ones into the
/// cache directory on first use.
///
/// One resolver lives for the whole process and is handed to `Plugin::init`.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    cache_dir: PathBuf,
    sources: BTreeMap<String, String>,
}

impl AssetResolver {
    pub fn new(config: &AssetsConfig) -> Self {
        let mut sources: BTreeMap<String, String> = BUILTIN_SOURCES
            .iter()
            .map(|(name, url)| (name.to_string(), url.to_string()))
            .collect();
        sources.extend(config.models.clone());

        Self {
            cache_dir: config.cache_dir.clone(),
            sources,
        }
    }

    /// Resolver that only serves files already present in `cache_dir`.
    pub fn offline(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            sources: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.sources.insert(name.into(), url.into());
        self
    }

    /// Whether `name` can be fetched when it is not cached.
    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf, AssetError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(AssetError::InvalidName(name.to_string()));
        }

        let path = self.cache_dir.join(name);
        if path.is_file() {
            tracing::debug!(model = %name, path = %path.display(), "model cached");
            return Ok(path);
        }

        let Some(url) = self.sources.get(name) else {
            return Err(AssetError::Unknown {
                name: name.to_string(),
                known: self.sources.keys().cloned().collect(),
            });
        };

        std::fs::create_dir_all(&self.cache_dir)?;
        self.download(name, url, &path)?;
        Ok(path)
    }

    fn download(&self, name: &str, url: &str, dest: &Path) -> Result<(), AssetError> {
        tracing::info!(model = %name, url = %url, "downloading model");

        let to_download_error = |source| AssetError::Download {
            name: name.to_string(),
            source,
        };

        let bytes = reqwest::blocking::Client::new()
            .get(url)
            .header(
                "User-Agent",
                format!("framepipe/{}", env!("CARGO_PKG_VERSION")),
            )
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(to_download_error)?;

        persist(&bytes, dest)?;

        tracing::info!(model = %name, bytes = bytes.len(), "model cached");
        Ok(())
    }
}

/// Writes through a `.part` file so `dest` only ever holds a complete download.
fn persist(bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    let temp_path = temp_path_for(dest);
    let written = std::fs::write(&temp_path, bytes).and_then(|()| std::fs::rename(&temp_path, dest));
    if written.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    written
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let mut temp = dest.as_os_str().to_owned();
    temp.push(".part");
    PathBuf::from(temp)
}
