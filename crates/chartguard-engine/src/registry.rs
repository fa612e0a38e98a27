//! Plugin registry
//!
//! Stores registered plugins in registration order, keyed by name. The
//! identity of each plugin (name, version, description, metadata, compiled
//! schema) is read once at registration and never re-read.

use chartguard_core::CompiledSchema;
use indexmap::IndexMap;
use indexmap::map::Entry;
use std::sync::Arc;

use crate::error::RegistrationError;
use crate::plugin::{Plugin, PluginMetadata};
use crate::suggestions::suggest_plugin_name;

/// Identity snapshot taken at registration
#[derive(Debug)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub metadata: PluginMetadata,
    pub schema: Option<Arc<CompiledSchema>>,
}

/// A plugin together with its identity snapshot
#[derive(Clone)]
pub struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    info: Arc<PluginInfo>,
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl RegisteredPlugin {
    /// Check a plugin's shape and snapshot its identity
    pub fn new(plugin: Arc<dyn Plugin>) -> Result<Self, RegistrationError> {
        let name = plugin.name().trim();
        if name.is_empty() {
            return Err(RegistrationError::InvalidPlugin {
                message: "plugin name must not be empty".to_string(),
            });
        }
        let name = name.to_string();

        let version = plugin.version().trim();
        if version.is_empty() {
            return Err(RegistrationError::InvalidPlugin {
                message: format!("plugin '{}' has an empty version", name),
            });
        }
        let version = version.to_string();

        let description = match plugin.description() {
            Some(d) if d.trim().is_empty() => {
                return Err(RegistrationError::InvalidPlugin {
                    message: format!("plugin '{}' has an empty description", name),
                });
            }
            other => other.map(str::to_string),
        };

        let schema = match plugin.config_schema() {
            Some(schema) => Some(Arc::new(schema.compile().map_err(|e| {
                RegistrationError::InvalidSchema {
                    plugin: name.clone(),
                    message: e.to_string(),
                }
            })?)),
            None => None,
        };

        let info = PluginInfo {
            name,
            version,
            description,
            metadata: plugin.metadata(),
            schema,
        };

        Ok(Self {
            plugin,
            info: Arc::new(info),
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }
}

/// Ordered collection of registered plugins
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a plugin
    pub fn register(
        &mut self,
        plugin: Arc<dyn Plugin>,
    ) -> Result<&RegisteredPlugin, RegistrationError> {
        let registered = RegisteredPlugin::new(plugin)?;
        self.insert(registered)
    }

    /// Fail if `name` is already taken
    pub fn ensure_available(&self, name: &str) -> Result<(), RegistrationError> {
        match self.plugins.get(name) {
            Some(existing) => Err(RegistrationError::DuplicatePlugin {
                name: name.to_string(),
                existing_version: existing.version().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Append an already validated plugin
    pub fn insert(
        &mut self,
        registered: RegisteredPlugin,
    ) -> Result<&RegisteredPlugin, RegistrationError> {
        match self.plugins.entry(registered.name().to_string()) {
            Entry::Occupied(existing) => Err(RegistrationError::DuplicatePlugin {
                name: existing.key().clone(),
                existing_version: existing.get().version().to_string(),
            }),
            Entry::Vacant(slot) => Ok(slot.insert(registered)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredPlugin> {
        self.plugins.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// All plugins, in registration order
    pub fn all(&self) -> impl Iterator<Item = &RegisteredPlugin> {
        self.plugins.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Cheap copy of the current plugin list for one run
    pub fn snapshot(&self) -> Vec<RegisteredPlugin> {
        self.plugins.values().cloned().collect()
    }

    /// Closest registered name to `name`
    pub fn suggest(&self, name: &str) -> Option<String> {
        suggest_plugin_name(name, self.plugins.keys().map(String::as_str))
    }
}
