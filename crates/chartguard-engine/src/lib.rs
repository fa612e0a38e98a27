//! Chartguard Engine - Policy plugin execution for Kubernetes manifests
//!
//! This crate provides:
//! - **Plugins**: The `Plugin` trait, plus `FnPlugin`/`PluginDescriptor` for plugins described as data
//! - **Registry**: Name-unique, order-preserving plugin registration
//! - **Configuration**: Layered per-plugin config (defaults, overrides, environment) checked against schemas
//! - **Execution**: Sequential or parallel runs with timeouts, retries and failure isolation
//! - **Reporting**: Severity buckets, summary statistics and run metadata

pub mod aggregator;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod suggestions;

pub use aggregator::{ResultAggregator, RunInfo};
pub use coordinator::{
    CoordinatorRun, ExecutionCoordinator, FailureKind, InvocationFailure, PluginOutcome,
};
pub use engine::{PolicyEngine, PolicyEngineBuilder, validate_optional};
pub use error::{EngineError, RegistrationError, Result};
pub use plugin::{FnPlugin, Plugin, PluginDescriptor, PluginError, PluginMetadata, PluginResult};
pub use registry::{PluginInfo, PluginRegistry, RegisteredPlugin};
pub use resolver::{ConfigurationResolver, ResolvedConfig, UnknownOverride};

// Re-exported so plugin authors need a single dependency
pub use async_trait::async_trait;
pub use chartguard_core;
