//! Policy plugin interface
//!
//! A plugin is any type implementing [`Plugin`]. Plugins whose identity is
//! only known at runtime (loaded from a YAML/JSON description) go through
//! [`PluginDescriptor::from_value`], which performs the structural checks the
//! type system cannot, and are wrapped in an [`FnPlugin`].

use async_trait::async_trait;
use chartguard_core::{ConfigSchema, Manifest, ValidationContext, Violation};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

use crate::error::RegistrationError;

/// Descriptive metadata a plugin may declare
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Configuration used when no override is supplied
    #[serde(default)]
    pub default_config: Map<String, JsonValue>,
}

/// Error returned by a plugin's `validate`
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PluginError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it as the source
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_source("invalid plugin configuration", e)
    }
}

/// Result of a plugin's `validate`
pub type PluginResult = std::result::Result<Vec<Violation>, PluginError>;

/// A policy plugin
///
/// Implementations must be Send + Sync: in parallel mode every invocation
/// runs on its own task. Identity methods are read once, at registration.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Shape of the configuration this plugin accepts
    fn config_schema(&self) -> Option<ConfigSchema> {
        None
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }

    /// Check the manifests and report findings
    ///
    /// Returning `Err` (or panicking) marks the invocation as failed; the
    /// engine decides whether that is retried, isolated or fatal.
    async fn validate(&self, manifests: &[Manifest], context: &ValidationContext)
    -> PluginResult;
}

/// Plugin identity described as data
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub config_schema: Option<ConfigSchema>,
    pub metadata: PluginMetadata,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            config_schema: None,
            metadata: PluginMetadata::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_config_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    pub fn with_default_config(mut self, config: JsonValue) -> Self {
        if let JsonValue::Object(map) = config {
            self.metadata.default_config = map;
        }
        self
    }

    pub fn with_metadata(mut self, metadata: PluginMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build a descriptor from an untyped value, checking its shape
    ///
    /// `name` and `version` must be strings; `description`, `configSchema`
    /// and `metadata` must have their documented types when present.
    pub fn from_value(value: &JsonValue) -> Result<Self, RegistrationError> {
        let obj = value.as_object().ok_or_else(|| invalid(format!(
            "plugin description must be an object, got {}",
            json_type(value)
        )))?;

        let name = required_string(obj, "name")?;
        let version = required_string(obj, "version")?;

        let description = match obj.get("description") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(invalid(format!(
                    "plugin '{}': description must be a string, got {}",
                    name,
                    json_type(other)
                )));
            }
        };

        let config_schema = match obj.get("configSchema") {
            None | Some(JsonValue::Null) => None,
            Some(schema @ JsonValue::Object(_)) => Some(
                ConfigSchema::from_value(schema.clone()).map_err(|e| {
                    RegistrationError::InvalidSchema {
                        plugin: name.clone(),
                        message: e.to_string(),
                    }
                })?,
            ),
            Some(other) => {
                return Err(invalid(format!(
                    "plugin '{}': configSchema must be an object, got {}",
                    name,
                    json_type(other)
                )));
            }
        };

        let metadata = match obj.get("metadata") {
            None | Some(JsonValue::Null) => PluginMetadata::default(),
            Some(meta @ JsonValue::Object(_)) => serde_json::from_value(meta.clone())
                .map_err(|e| invalid(format!("plugin '{}': invalid metadata: {}", name, e)))?,
            Some(other) => {
                return Err(invalid(format!(
                    "plugin '{}': metadata must be an object, got {}",
                    name,
                    json_type(other)
                )));
            }
        };

        Ok(Self {
            name,
            version,
            description,
            config_schema,
            metadata,
        })
    }
}

fn invalid(message: String) -> RegistrationError {
    RegistrationError::InvalidPlugin { message }
}

fn required_string(obj: &Map<String, JsonValue>, key: &str) -> Result<String, RegistrationError> {
    match obj.get(key) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(invalid(format!(
            "plugin {} must be a string, got {}",
            key,
            json_type(other)
        ))),
        None => Err(invalid(format!("plugin {} is missing", key))),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

type ValidateFn =
    dyn Fn(&[Manifest], &ValidationContext) -> BoxFuture<'static, PluginResult> + Send + Sync;

/// Plugin built from a descriptor and a closure
///
/// ```
/// use chartguard_core::Violation;
/// use chartguard_engine::{FnPlugin, PluginDescriptor};
///
/// let plugin = FnPlugin::new(PluginDescriptor::new("non-empty", "1.0.0"), |manifests, _ctx| {
///     if manifests.is_empty() {
///         Ok(vec![Violation::warning("non-empty", "no manifests rendered")])
///     } else {
///         Ok(vec![])
///     }
/// });
/// ```
#[derive(Clone)]
pub struct FnPlugin {
    descriptor: PluginDescriptor,
    validate: Arc<ValidateFn>,
}

impl std::fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPlugin")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl FnPlugin {
    /// Create a plugin from a synchronous check
    ///
    /// The check runs on the blocking thread pool with its own copy of the
    /// inputs, so a check that never yields can still be timed out. A panic
    /// in the check resurfaces as a panic of the returned future.
    pub fn new<F>(descriptor: PluginDescriptor, validate: F) -> Self
    where
        F: Fn(&[Manifest], &ValidationContext) -> PluginResult + Send + Sync + 'static,
    {
        let validate = Arc::new(validate);
        Self {
            descriptor,
            validate: Arc::new(move |manifests: &[Manifest], ctx: &ValidationContext| {
                let validate = Arc::clone(&validate);
                let manifests = manifests.to_vec();
                let ctx = ctx.clone();
                Box::pin(async move {
                    match tokio::task::spawn_blocking(move || validate(&manifests, &ctx)).await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Err(e) => Err(PluginError::with_source("plugin task was cancelled", e)),
                    }
                }) as BoxFuture<'static, PluginResult>
            }),
        }
    }

    /// Create a plugin from an asynchronous check
    ///
    /// The closure gets borrowed inputs and must move whatever it needs into
    /// the returned future.
    pub fn new_async<F>(descriptor: PluginDescriptor, validate: F) -> Self
    where
        F: Fn(&[Manifest], &ValidationContext) -> BoxFuture<'static, PluginResult>
            + Send
            + Sync
            + 'static,
    {
        Self {
            descriptor,
            validate: Arc::new(validate),
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn version(&self) -> &str {
        &self.descriptor.version
    }

    fn description(&self) -> Option<&str> {
        self.descriptor.description.as_deref()
    }

    fn config_schema(&self) -> Option<ConfigSchema> {
        self.descriptor.config_schema.clone()
    }

    fn metadata(&self) -> PluginMetadata {
        self.descriptor.metadata.clone()
    }

    async fn validate(&self, manifests: &[Manifest], context: &ValidationContext) -> PluginResult {
        (self.validate)(manifests, context).await
    }
}
