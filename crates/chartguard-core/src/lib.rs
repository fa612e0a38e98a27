//! Chartguard Core - Core types for the policy validation engine
//!
//! This crate provides the data model shared by the engine and its plugins:
//! - `Violation`: A single attributed finding with a severity
//! - `ValidationContext`: Read-only inputs handed to each plugin invocation
//! - `ValidationResult`: The aggregated report of a run
//! - `EngineConfig` / `EngineOptions`: Engine configuration and partial updates
//! - `ConfigSchema`: Declared shape of a plugin's configuration

pub mod config;
pub mod context;
pub mod error;
pub mod manifest;
pub mod result;
pub mod schema;
pub mod violation;

pub use config::{EngineConfig, EngineOptions, PluginOverrides, RetryConfig, RetryOptions};
pub use context::{ChartMetadata, ValidationContext};
pub use error::{CoreError, Result, SchemaErrorInfo};
pub use manifest::{Manifest, manifests_from_yaml, resource_label};
pub use result::{
    PluginExecution, PluginStatus, RunMetadata, SeverityCounts, ValidationResult,
    ValidationSummary, ViolationFrequency,
};
pub use schema::{CompiledSchema, ConfigSchema, PropertyType, SimpleProperty, SimpleSchema};
pub use violation::{ISOLATED_KEY, PLUGIN_EXECUTION_PATH, Severity, Violation};
