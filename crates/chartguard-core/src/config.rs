//! Engine configuration
//!
//! [`EngineConfig`] is the complete, immutable configuration snapshot a
//! validation run uses. [`EngineOptions`] is a partial update: every field is
//! optional, and merging options into a config only touches what the options
//! mention.
//!
//! Options can be loaded from YAML or JSON:
//!
//! ```yaml
//! parallel: true
//! timeout: 5s
//! retry:
//!   maxAttempts: 3
//!   baseDelay: 200ms
//! environment: production
//! pluginConfig:
//!   resource-limits:
//!     maxCpu: "2"
//! environments:
//!   production:
//!     resource-limits:
//!       maxCpu: "4"
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Per-plugin configuration overrides, keyed by plugin name
pub type PluginOverrides = IndexMap<String, Map<String, JsonValue>>;

/// Retry and backoff policy for failed plugin invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts per invocation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Growth factor applied to the delay after each retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Retry invocations that exceeded the timeout
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,

    /// Retry invocations where the plugin returned an error or panicked
    #[serde(default)]
    pub retry_on_plugin_error: bool,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            retry_on_timeout: true,
            retry_on_plugin_error: false,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before retry number `retry` (1-based)
    ///
    /// `min(base_delay * backoff_multiplier^(retry - 1), max_delay)`
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::InvalidConfig {
                message: "retry.maxAttempts must be at least 1".to_string(),
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(CoreError::InvalidConfig {
                message: format!(
                    "retry.backoffMultiplier must be a positive number, got {}",
                    self.backoff_multiplier
                ),
            });
        }
        Ok(())
    }
}

/// Complete engine configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Run all plugins concurrently instead of in registration order
    #[serde(default)]
    pub parallel: bool,

    /// Stop scheduling plugins once an error-severity finding is recorded
    #[serde(default)]
    pub fail_fast: bool,

    /// Turn plugin failures into isolated findings instead of failing the run
    #[serde(default = "default_true")]
    pub graceful_degradation: bool,

    /// Limit for a single plugin invocation
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Engine-wide configuration overrides per plugin
    #[serde(default)]
    pub plugin_config: PluginOverrides,

    /// Active environment tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Environment-specific overrides, applied on top of `plugin_config`
    #[serde(default)]
    pub environments: IndexMap<String, PluginOverrides>,

    /// Check merged plugin configuration against declared schemas
    #[serde(default = "default_true")]
    pub validate_config_schemas: bool,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            fail_fast: false,
            graceful_degradation: true,
            timeout: default_timeout(),
            retry: RetryConfig::default(),
            plugin_config: PluginOverrides::new(),
            environment: None,
            environments: IndexMap::new(),
            validate_config_schemas: true,
        }
    }
}

impl EngineConfig {
    /// Produce a new snapshot with `options` applied on top of this one
    ///
    /// Fields absent from `options` keep their current value. Per-plugin
    /// override objects are merged key by key.
    pub fn merged(&self, options: &EngineOptions) -> EngineConfig {
        let mut next = self.clone();

        if let Some(parallel) = options.parallel {
            next.parallel = parallel;
        }
        if let Some(fail_fast) = options.fail_fast {
            next.fail_fast = fail_fast;
        }
        if let Some(graceful) = options.graceful_degradation {
            next.graceful_degradation = graceful;
        }
        if let Some(timeout) = options.timeout {
            next.timeout = timeout;
        }
        if let Some(retry) = &options.retry {
            retry.apply_to(&mut next.retry);
        }
        if let Some(environment) = &options.environment {
            next.environment = Some(environment.clone());
        }
        if let Some(validate) = options.validate_config_schemas {
            next.validate_config_schemas = validate;
        }

        merge_overrides(&mut next.plugin_config, &options.plugin_config);
        for (environment, overrides) in &options.environments {
            merge_overrides(
                next.environments.entry(environment.clone()).or_default(),
                overrides,
            );
        }

        next
    }

    /// Check the snapshot for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(CoreError::InvalidConfig {
                message: "timeout must be greater than zero".to_string(),
            });
        }
        self.retry.validate()
    }

    /// Engine-wide override for one plugin
    pub fn plugin_overrides(&self, plugin: &str) -> Option<&Map<String, JsonValue>> {
        self.plugin_config.get(plugin)
    }

    /// Override for one plugin in the active environment
    pub fn environment_overrides(&self, plugin: &str) -> Option<&Map<String, JsonValue>> {
        let environment = self.environment.as_ref()?;
        self.environments.get(environment)?.get(plugin)
    }

    /// Every plugin name mentioned by an override, in first-seen order
    pub fn referenced_plugins(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugin_config.keys().map(String::as_str).collect();
        for overrides in self.environments.values() {
            for name in overrides.keys() {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

fn merge_overrides(target: &mut PluginOverrides, source: &PluginOverrides) {
    for (plugin, values) in source {
        let entry = target.entry(plugin.clone()).or_default();
        for (key, value) in values {
            entry.insert(key.clone(), value.clone());
        }
    }
}

/// Partial retry policy update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryOptions {
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default, with = "humantime_serde")]
    pub base_delay: Option<Duration>,

    #[serde(default)]
    pub backoff_multiplier: Option<f64>,

    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,

    #[serde(default)]
    pub retry_on_timeout: Option<bool>,

    #[serde(default)]
    pub retry_on_plugin_error: Option<bool>,
}

impl RetryOptions {
    fn apply_to(&self, retry: &mut RetryConfig) {
        if let Some(v) = self.max_attempts {
            retry.max_attempts = v;
        }
        if let Some(v) = self.base_delay {
            retry.base_delay = v;
        }
        if let Some(v) = self.backoff_multiplier {
            retry.backoff_multiplier = v;
        }
        if let Some(v) = self.max_delay {
            retry.max_delay = v;
        }
        if let Some(v) = self.retry_on_timeout {
            retry.retry_on_timeout = v;
        }
        if let Some(v) = self.retry_on_plugin_error {
            retry.retry_on_plugin_error = v;
        }
    }
}

/// Partial engine configuration update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineOptions {
    #[serde(default)]
    pub parallel: Option<bool>,

    #[serde(default)]
    pub fail_fast: Option<bool>,

    #[serde(default)]
    pub graceful_degradation: Option<bool>,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub retry: Option<RetryOptions>,

    #[serde(default)]
    pub plugin_config: PluginOverrides,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub environments: IndexMap<String, PluginOverrides>,

    #[serde(default)]
    pub validate_config_schemas: Option<bool>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a file (`.json` is parsed as JSON, anything else as YAML)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn graceful_degradation(mut self, graceful: bool) -> Self {
        self.graceful_degradation = Some(graceful);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn validate_config_schemas(mut self, validate: bool) -> Self {
        self.validate_config_schemas = Some(validate);
        self
    }

    /// Set the override for one plugin
    ///
    /// Non-object values are ignored: a plugin override is always an object.
    pub fn plugin_config(mut self, plugin: impl Into<String>, config: JsonValue) -> Self {
        if let JsonValue::Object(map) = config {
            self.plugin_config.insert(plugin.into(), map);
        }
        self
    }

    /// Set the override for one plugin in one environment
    pub fn environment_config(
        mut self,
        environment: impl Into<String>,
        plugin: impl Into<String>,
        config: JsonValue,
    ) -> Self {
        if let JsonValue::Object(map) = config {
            self.environments
                .entry(environment.into())
                .or_default()
                .insert(plugin.into(), map);
        }
        self
    }
}
