//! Per-plugin validation context

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Chart identity handed to plugins alongside the manifests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name
    pub name: String,

    /// Chart version
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Kubernetes version constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ChartMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}

/// Read-only inputs for one plugin invocation
///
/// Every plugin gets its own context; nothing in it is shared mutably
/// with other plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationContext {
    config: Map<String, JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    chart: Option<Arc<ChartMetadata>>,
}

impl ValidationContext {
    pub fn new(
        config: Map<String, JsonValue>,
        environment: Option<String>,
        chart: Option<Arc<ChartMetadata>>,
    ) -> Self {
        Self {
            config,
            environment,
            chart,
        }
    }

    /// Resolved plugin configuration (defaults merged with overrides)
    pub fn config(&self) -> &Map<String, JsonValue> {
        &self.config
    }

    /// Get a single configuration entry
    pub fn config_value(&self, key: &str) -> Option<&JsonValue> {
        self.config.get(key)
    }

    /// Deserialize the whole configuration into a typed struct
    pub fn config_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(JsonValue::Object(self.config.clone()))
    }

    /// Active environment tag, if any
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn chart(&self) -> Option<&ChartMetadata> {
        self.chart.as_deref()
    }
}
