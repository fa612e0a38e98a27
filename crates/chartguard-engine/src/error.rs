//! Engine error types

use chartguard_core::{CoreError, SchemaErrorInfo};
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the caller of `register` or `configure`
///
/// These are never recovered by the engine.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum RegistrationError {
    #[error("invalid plugin: {message}")]
    #[diagnostic(
        code(chartguard::registration::invalid_plugin),
        help("a plugin needs a non-empty name and version")
    )]
    InvalidPlugin { message: String },

    #[error("plugin '{name}' is already registered (version {existing_version})")]
    #[diagnostic(
        code(chartguard::registration::duplicate),
        help("plugin names must be unique; rename one of the plugins")
    )]
    DuplicatePlugin {
        name: String,
        existing_version: String,
    },

    #[error("plugin '{plugin}' declares an invalid config schema: {message}")]
    #[diagnostic(code(chartguard::registration::invalid_schema))]
    InvalidSchema { plugin: String, message: String },

    #[error("configuration for plugin '{plugin}' does not match its schema: {}", format_schema_errors(.errors))]
    #[diagnostic(
        code(chartguard::registration::config_mismatch),
        help("check `pluginConfig` and `environments` for this plugin against its declared schema")
    )]
    ConfigSchemaMismatch {
        plugin: String,
        errors: Vec<SchemaErrorInfo>,
    },

    #[error("invalid engine configuration: {message}")]
    #[diagnostic(code(chartguard::registration::invalid_config))]
    InvalidConfig { message: String },
}

fn format_schema_errors(errors: &[SchemaErrorInfo]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<CoreError> for RegistrationError {
    fn from(e: CoreError) -> Self {
        RegistrationError::InvalidConfig {
            message: e.to_string(),
        }
    }
}

/// Main engine error type
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registration(#[from] RegistrationError),

    /// A plugin failed and graceful degradation is disabled
    #[error("plugin '{plugin}' failed after {attempts} attempt(s): {message}")]
    #[diagnostic(
        code(chartguard::execution::plugin_failed),
        help("enable graceful degradation to report plugin failures as findings instead")
    )]
    PluginFailed {
        plugin: String,
        message: String,
        attempts: u32,
    },

    /// A plugin timed out and graceful degradation is disabled
    #[error("plugin '{plugin}' timed out after {}ms ({attempts} attempt(s))", .timeout.as_millis())]
    #[diagnostic(
        code(chartguard::execution::timeout),
        help("raise `timeout` or enable graceful degradation")
    )]
    PluginTimedOut {
        plugin: String,
        timeout: Duration,
        attempts: u32,
    },

    /// A scheduled plugin task could not be joined
    #[error("plugin task failed: {message}")]
    #[diagnostic(code(chartguard::execution::task))]
    Task { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
