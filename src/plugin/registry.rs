use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::{Plugin, PluginError, SharedPlugin};

pub type PluginFactory = fn() -> Result<Box<dyn Plugin>, PluginError>;

/// Entry of the registration table: a stable id and the factory that builds it.
#[derive(Clone, Copy)]
pub struct PluginRegistration {
    pub id: &'static str,
    pub factory: PluginFactory,
}

impl PluginRegistration {
    pub const fn new(id: &'static str, factory: PluginFactory) -> Self {
        Self { id, factory }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown plugin '{id}', available: {available:?}")]
    UnknownPlugin { id: String, available: Vec<String> },
}

#[derive(Clone)]
pub struct RegisteredPlugin {
    pub id: &'static str,
    pub display_name: &'static str,
    pub plugin: SharedPlugin,
}

/// Instantiated plugins in discovery order.
///
/// Each registration is built exactly once. A failing factory is recorded and
/// skipped; ids already taken are dropped, first registration wins.
pub struct PluginRegistry {
    entries: Vec<RegisteredPlugin>,
    failures: Vec<FactoryFailure>,
}

impl PluginRegistry {
    /// Built-in plugins in their fixed order, then the extra registrations.
    pub fn discover() -> Self {
        Self::from_registrations(
            crate::plugins::BUILTIN_PLUGINS
                .iter()
                .chain(crate::plugins::EXTRA_PLUGINS.iter())
                .copied(),
        )
    }

    pub fn from_registrations<I>(registrations: I) -> Self
    where
        I: IntoIterator<Item = PluginRegistration>,
    {
        let mut entries: Vec<RegisteredPlugin> = Vec::new();
        let mut failures = Vec::new();
        let mut seen: HashSet<&'static str> = HashSet::new();

        for registration in registrations {
            if seen.contains(registration.id) {
                tracing::warn!(plugin = %registration.id, "duplicate plugin id, skipping");
                continue;
            }

            let built = panic::catch_unwind(AssertUnwindSafe(registration.factory))
                .unwrap_or_else(|_| {
                    Err(PluginError::model(format!(
                        "factory for '{}' panicked",
                        registration.id
                    )))
                });

            let plugin = match built {
                Ok(plugin) => plugin,
                Err(e) => {
                    tracing::warn!(plugin = %registration.id, error = %e, "plugin failed to load");
                    failures.push(FactoryFailure {
                        id: registration.id.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let id = plugin.plugin_id();
            if id.is_empty() {
                failures.push(FactoryFailure {
                    id: registration.id.to_string(),
                    reason: "plugin reported an empty id".to_string(),
                });
                continue;
            }
            if !seen.insert(id) {
                tracing::warn!(plugin = %id, "duplicate plugin id, skipping");
                continue;
            }
            seen.insert(registration.id);

            tracing::debug!(plugin = %id, name = %plugin.display_name(), "plugin registered");
            entries.push(RegisteredPlugin {
                id,
                display_name: plugin.display_name(),
                plugin: Arc::new(Mutex::new(plugin)),
            });
        }

        Self { entries, failures }
    }

    pub fn list(&self) -> &[RegisteredPlugin] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn get(&self, id: &str) -> Result<SharedPlugin, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| Arc::clone(&e.plugin))
            .ok_or_else(|| RegistryError::UnknownPlugin {
                id: id.to_string(),
                available: self.entries.iter().map(|e| e.id.to_string()).collect(),
            })
    }

    pub fn failures(&self) -> &[FactoryFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
