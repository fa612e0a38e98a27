//! Validation run results

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::violation::{Severity, Violation};

/// Outcome of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// `true` iff no error-severity finding exists
    pub valid: bool,

    /// All error-severity findings
    pub violations: Vec<Violation>,

    /// All warning and info findings
    pub warnings: Vec<Violation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ValidationSummary>,

    pub metadata: RunMetadata,
}

impl ValidationResult {
    /// All findings, errors first
    pub fn findings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().chain(self.warnings.iter())
    }

    /// Findings produced by one plugin
    pub fn findings_for<'a>(&'a self, plugin: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.findings().filter(move |v| v.plugin == plugin)
    }

    pub fn error_count(&self) -> usize {
        self.violations.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(self)
    }
}

/// Finding counts per severity
///
/// Always serialized with all three keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.error += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> usize {
        self.error + self.warning + self.info
    }
}

/// How often one finding shape (message + field) occurred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationFrequency {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub count: usize,
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total_violations: usize,

    pub violations_by_severity: SeverityCounts,

    /// Finding count per registered plugin, in registration order
    pub violations_by_plugin: IndexMap<String, usize>,

    /// Most frequent finding shapes, most frequent first
    pub most_common_violations: Vec<ViolationFrequency>,

    /// Plugins whose result was replaced by an isolated failure finding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub isolated_failures: Vec<String>,
}

/// Final state of one plugin in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// The plugin returned its findings
    Completed,
    /// The plugin errored, panicked or timed out on every attempt
    Failed,
}

/// Execution record for one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginExecution {
    pub name: String,

    pub status: PluginStatus,

    pub attempts: u32,

    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Run metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    /// Registered plugins at the start of the run
    pub plugin_count: usize,

    pub manifest_count: usize,

    /// Wall-clock duration of the whole run
    #[serde(with = "duration_millis")]
    pub execution_time: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Plugins whose outcome was collected
    #[serde(default)]
    pub executed_plugins: usize,

    /// Fail-fast stopped scheduling before every plugin ran
    #[serde(default)]
    pub halted_early: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginExecution>,
}

/// Serialize durations as whole milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
