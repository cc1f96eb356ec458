mod registry;
mod result;
mod settings;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::assets::{AssetError, AssetResolver};
use crate::frame::{Frame, FrameError};

pub use registry::{
    FactoryFailure, PluginFactory, PluginRegistration, PluginRegistry, RegisteredPlugin, RegistryError,
};
pub use result::{BoundingBox, Detection, LandmarkGroup, LandmarkPoint, UnifiedResult};
pub use settings::{SettingKind, SettingSpec, SettingValue, Settings};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is not initialized")]
    NotInitialized(&'static str),
    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },
    #[error("model asset: {0}")]
    Asset(#[from] AssetError),
    #[error("model error: {0}")]
    Model(BoxError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("plugin lock poisoned")]
    Poisoned,
}

impl PluginError {
    pub fn model(err: impl Into<BoxError>) -> Self {
        PluginError::Model(err.into())
    }
}

impl From<opencv::Error> for PluginError {
    fn from(err: opencv::Error) -> Self {
        PluginError::Model(Box::new(err))
    }
}

/// Contract implemented by every analysis module.
///
/// A plugin is created once by the registry. `init` opens a model session and may be
/// called again to re-initialize with new settings; it must release the previous
/// session first. `close` releases the session and is idempotent. `process` reports
/// "nothing found" as an empty result, never as an error.
pub trait Plugin: Send {
    fn plugin_id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn settings_schema(&self) -> &'static [SettingSpec];

    fn default_settings(&self) -> Settings {
        Settings::defaults(self.settings_schema())
    }

    fn init(&mut self, settings: &Settings, assets: &AssetResolver) -> Result<(), PluginError>;

    /// Returns the annotated frame and the result record for `frame`.
    fn process(&mut self, frame: &Frame, timestamp_s: f64)
        -> Result<(Frame, UnifiedResult), PluginError>;

    fn close(&mut self);

    fn is_initialized(&self) -> bool;
}

pub type SharedPlugin = Arc<Mutex<Box<dyn Plugin>>>;

/// Integral, non-decreasing milliseconds handed to detector sessions.
pub fn timestamp_ms(timestamp_s: f64) -> i64 {
    (timestamp_s * 1000.0) as i64
}

/// Runs `init` on a blocking task so the caller's interactive context stays free.
///
/// Model loading can take seconds; the returned handle resolves once the session
/// is ready or has failed. There is no cancellation.
pub fn spawn_init(
    plugin: SharedPlugin,
    settings: Settings,
    assets: Arc<AssetResolver>,
) -> tokio::task::JoinHandle<Result<(), PluginError>> {
    tokio::task::spawn_blocking(move || {
        let mut guard = plugin.lock().map_err(|_| PluginError::Poisoned)?;
        let plugin_id = guard.plugin_id();
        tracing::info!(plugin = %plugin_id, "initializing plugin");

        let started = std::time::Instant::now();
        match guard.init(&settings, &assets) {
            Ok(()) => {
                tracing::info!(
                    plugin = %plugin_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "plugin ready"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(plugin = %plugin_id, error = %e, "plugin init failed");
                Err(e)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingPlugin {
        inits: usize,
        closes: usize,
        ready: bool,
    }

    const SCHEMA: &[SettingSpec] = &[SettingSpec::float("threshold", "Threshold", 0.0, 1.0, 0.5)];

    impl Plugin for CountingPlugin {
        fn plugin_id(&self) -> &'static str {
            "counting"
        }

        fn display_name(&self) -> &'static str {
            "Counting"
        }

        fn settings_schema(&self) -> &'static [SettingSpec] {
            SCHEMA
        }

        fn init(&mut self, settings: &Settings, _assets: &AssetResolver) -> Result<(), PluginError> {
            self.close();
            if settings.f32_or("threshold", 0.0) > 0.9 {
                return Err(PluginError::InvalidSetting {
                    name: "threshold".into(),
                    reason: "too strict".into(),
                });
            }
            self.inits += 1;
            self.ready = true;
            Ok(())
        }

        fn process(
            &mut self,
            frame: &Frame,
            timestamp_s: f64,
        ) -> Result<(Frame, UnifiedResult), PluginError> {
            if !self.ready {
                return Err(PluginError::NotInitialized(self.plugin_id()));
            }
            Ok((frame.clone(), UnifiedResult::new(self.plugin_id(), timestamp_s)))
        }

        fn close(&mut self) {
            if self.ready {
                self.closes += 1;
            }
            self.ready = false;
        }

        fn is_initialized(&self) -> bool {
            self.ready
        }
    }

    fn shared() -> SharedPlugin {
        Arc::new(Mutex::new(Box::new(CountingPlugin {
            inits: 0,
            closes: 0,
            ready: false,
        })))
    }

    #[test]
    fn test_timestamp_ms_truncates() {
        assert_eq!(timestamp_ms(1.2345), 1234);
        assert_eq!(timestamp_ms(0.0), 0);
    }

    #[tokio::test]
    async fn test_spawn_init_readies_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let assets = Arc::new(AssetResolver::offline(dir.path()));
        let plugin = shared();

        let settings = plugin.lock().unwrap().default_settings();
        spawn_init(plugin.clone(), settings.clone(), assets.clone())
            .await
            .unwrap()
            .unwrap();
        assert!(plugin.lock().unwrap().is_initialized());

        // re-init goes through close first
        spawn_init(plugin.clone(), settings, assets).await.unwrap().unwrap();
        let frame = Frame::black(2, 2);
        let (_, result) = plugin.lock().unwrap().process(&frame, 0.5).unwrap();
        assert_eq!(result.pipeline(), "counting");
    }

    #[tokio::test]
    async fn test_spawn_init_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let assets = Arc::new(AssetResolver::offline(dir.path()));
        let plugin = shared();

        let mut overrides = std::collections::BTreeMap::new();
        overrides.insert("threshold".to_string(), SettingValue::Float(0.95));
        let settings = Settings::resolve(SCHEMA, &overrides).unwrap();

        let result = spawn_init(plugin.clone(), settings, assets).await.unwrap();
        assert!(matches!(result, Err(PluginError::InvalidSetting { .. })));
        assert!(!plugin.lock().unwrap().is_initialized());
    }

    #[test]
    fn test_registered_plugins_nameable_from_plugin_module() {
        let registry = PluginRegistry::discover();
        let listed: &[RegisteredPlugin] = registry.list();
        let ids: Vec<&str> = listed.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, registry.ids());
    }

    #[test]
    fn test_process_before_init_fails() {
        let plugin = shared();
        let frame = Frame::black(1, 1);
        let err = plugin.lock().unwrap().process(&frame, 0.0).unwrap_err();
        assert!(matches!(err, PluginError::NotInitialized("counting")));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let assets = AssetResolver::offline(dir.path());
        let mut plugin = CountingPlugin {
            inits: 0,
            closes: 0,
            ready: false,
        };
        let settings = plugin.default_settings();
        plugin.init(&settings, &assets).unwrap();
        plugin.close();
        plugin.close();
        assert_eq!(plugin.inits, 1);
        assert_eq!(plugin.closes, 1);
    }
}
