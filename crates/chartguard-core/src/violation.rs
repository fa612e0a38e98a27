//! Findings produced by policy plugins

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

use crate::error::CoreError;

/// Context key marking a finding synthesized from a plugin failure
pub const ISOLATED_KEY: &str = "isolated";

/// Resource path used for findings synthesized from a plugin failure
pub const PLUGIN_EXECUTION_PATH: &str = "plugin-execution";

/// Severity of a finding
///
/// Only `Error` fails a validation run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// All severities, most severe first
    pub const ALL: [Severity; 3] = [Severity::Error, Severity::Warning, Severity::Info];

    /// Does this severity fail the run?
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(CoreError::InvalidConfig {
                message: format!("unknown severity '{}'", other),
            }),
        }
    }
}

/// A single attributed finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Name of the plugin that produced the finding
    pub plugin: String,

    pub severity: Severity,

    pub message: String,

    /// Location of the offending resource (e.g. `Deployment/web`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,

    /// Offending field within the resource (e.g. `spec.replicas`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// How to fix it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Free-form extra data
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, JsonValue>,
}

impl Violation {
    pub fn new(plugin: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            severity,
            message: message.into(),
            resource_path: None,
            field: None,
            suggestion: None,
            context: Map::new(),
        }
    }

    pub fn error(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin, Severity::Error, message)
    }

    pub fn warning(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin, Severity::Warning, message)
    }

    pub fn info(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(plugin, Severity::Info, message)
    }

    pub fn with_resource_path(mut self, path: impl Into<String>) -> Self {
        self.resource_path = Some(path.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add an entry to the context bag
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }

    /// Was this finding synthesized from a plugin failure rather than reported by the plugin?
    pub fn is_isolated(&self) -> bool {
        self.context
            .get(ISOLATED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
