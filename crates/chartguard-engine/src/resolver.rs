//! Per-plugin configuration resolution
//!
//! Layers, lowest to highest precedence:
//! 1. the plugin's declared `defaultConfig`
//! 2. the engine-wide `pluginConfig[plugin]` override
//! 3. `environments[environment][plugin]` when an environment is active
//!
//! Each layer is merged shallowly: top-level keys from a higher layer replace
//! the same keys below, every other key survives.

use chartguard_core::{ChartMetadata, EngineConfig, EngineOptions, ValidationContext};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::error::RegistrationError;
use crate::registry::{PluginInfo, PluginRegistry};

/// Merged configuration handed to one plugin
pub type ResolvedConfig = Map<String, JsonValue>;

/// An override naming a plugin that is not registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOverride {
    pub name: String,
    pub suggestion: Option<String>,
}

/// Builds plugin configuration from one engine configuration snapshot
#[derive(Debug, Clone)]
pub struct ConfigurationResolver {
    config: Arc<EngineConfig>,
}

impl ConfigurationResolver {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Merge options into the engine-wide snapshot
    ///
    /// Settings the options leave out keep their current value. An invalid
    /// result leaves the snapshot untouched.
    pub fn set_global_config(&mut self, options: &EngineOptions) -> Result<(), RegistrationError> {
        let next = self.config.merged(options);
        next.validate()?;
        self.config = Arc::new(next);
        Ok(())
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Merge the configuration layers for one plugin and check the result
    pub fn resolve(&self, plugin: &PluginInfo) -> Result<ResolvedConfig, RegistrationError> {
        let mut resolved = plugin.metadata.default_config.clone();

        if let Some(overrides) = self.config.plugin_overrides(&plugin.name) {
            merge_shallow(&mut resolved, overrides);
        }
        if let Some(overrides) = self.config.environment_overrides(&plugin.name) {
            merge_shallow(&mut resolved, overrides);
        }

        if self.config.validate_config_schemas {
            if let Some(schema) = &plugin.schema {
                let errors = schema.validate(&resolved);
                if !errors.is_empty() {
                    return Err(RegistrationError::ConfigSchemaMismatch {
                        plugin: plugin.name.clone(),
                        errors,
                    });
                }
            }
        }

        Ok(resolved)
    }

    /// Build the invocation context for one plugin
    pub fn context_for(
        &self,
        plugin: &PluginInfo,
        chart: Option<Arc<ChartMetadata>>,
    ) -> Result<ValidationContext, RegistrationError> {
        let config = self.resolve(plugin)?;
        Ok(ValidationContext::new(
            config,
            self.config.environment.clone(),
            chart,
        ))
    }

    /// Check every registered plugin against this snapshot
    pub fn check_all(&self, registry: &PluginRegistry) -> Result<(), RegistrationError> {
        for plugin in registry.all() {
            self.resolve(plugin.info())?;
        }
        Ok(())
    }

    /// Override keys that name no registered plugin
    pub fn unknown_overrides(&self, registry: &PluginRegistry) -> Vec<UnknownOverride> {
        self.config
            .referenced_plugins()
            .into_iter()
            .filter(|name| !registry.contains(name))
            .map(|name| UnknownOverride {
                name: name.to_string(),
                suggestion: registry.suggest(name),
            })
            .collect()
    }
}

fn merge_shallow(target: &mut Map<String, JsonValue>, layer: &Map<String, JsonValue>) {
    for (key, value) in layer {
        target.insert(key.clone(), value.clone());
    }
}
