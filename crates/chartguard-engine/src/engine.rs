//! Policy engine facade

use chartguard_core::{ChartMetadata, EngineConfig, EngineOptions, Manifest, ValidationResult};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::aggregator::{ResultAggregator, RunInfo};
use crate::coordinator::ExecutionCoordinator;
use crate::error::{RegistrationError, Result};
use crate::plugin::Plugin;
use crate::registry::{PluginRegistry, RegisteredPlugin};
use crate::resolver::ConfigurationResolver;

/// Builder for a [`PolicyEngine`]
#[derive(Default)]
pub struct PolicyEngineBuilder {
    options: EngineOptions,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PolicyEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin; plugins are registered in the order they are added
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Apply options on top of the defaults (merged like `configure`)
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> std::result::Result<PolicyEngine, RegistrationError> {
        let config = EngineConfig::default().merged(&self.options);
        config.validate()?;

        let engine = PolicyEngine::with_config(config);
        for plugin in self.plugins {
            engine.register_arc(plugin)?;
        }
        engine.warn_unknown_overrides();
        Ok(engine)
    }
}

/// Runs registered policy plugins against manifests
///
/// Registration and configuration take `&self` and may race with runs: a run
/// snapshots the plugin list and configuration when it starts.
pub struct PolicyEngine {
    resolver: RwLock<ConfigurationResolver>,
    registry: RwLock<PluginRegistry>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config())
            .field("plugins", &self.plugin_names())
            .finish()
    }
}

impl PolicyEngine {
    /// Engine with default configuration and no plugins
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with a complete configuration
    ///
    /// The configuration is not validated here; use [`PolicyEngine::builder`]
    /// or [`PolicyEngine::configure`] for checked input.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            resolver: RwLock::new(ConfigurationResolver::new(Arc::new(config))),
            registry: RwLock::new(PluginRegistry::new()),
        }
    }

    pub fn builder() -> PolicyEngineBuilder {
        PolicyEngineBuilder::new()
    }

    /// Register a plugin
    pub fn register(
        &self,
        plugin: impl Plugin + 'static,
    ) -> std::result::Result<(), RegistrationError> {
        self.register_arc(Arc::new(plugin))
    }

    /// Register a shared plugin
    ///
    /// The plugin's merged configuration is checked against its schema using
    /// the configuration current at this moment.
    pub fn register_arc(
        &self,
        plugin: Arc<dyn Plugin>,
    ) -> std::result::Result<(), RegistrationError> {
        let resolver = read(&self.resolver);
        let mut registry = write(&self.registry);

        let candidate = RegisteredPlugin::new(plugin)?;
        registry.ensure_available(candidate.name())?;
        resolver.resolve(candidate.info())?;

        let registered = registry.insert(candidate)?;
        info!(
            plugin = %registered.name(),
            version = %registered.version(),
            "registered plugin"
        );
        Ok(())
    }

    /// Merge options into the current configuration
    ///
    /// Values the options do not mention are kept. On error the previous
    /// configuration stays in place.
    pub fn configure(&self, options: EngineOptions) -> std::result::Result<(), RegistrationError> {
        let mut resolver = write(&self.resolver);
        let mut next = resolver.clone();
        next.set_global_config(&options)?;

        let registry = read(&self.registry);
        next.check_all(&registry)?;
        log_unknown_overrides(&next, &registry);

        *resolver = next;
        Ok(())
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(read(&self.resolver).config())
    }

    pub fn plugin_count(&self) -> usize {
        read(&self.registry).count()
    }

    /// Registered plugin names, in registration order
    pub fn plugin_names(&self) -> Vec<String> {
        read(&self.registry).names()
    }

    /// Run every registered plugin once and aggregate the findings
    ///
    /// Fails only when graceful degradation is disabled and a plugin failed
    /// or timed out.
    pub async fn validate(
        &self,
        manifests: impl Into<Arc<[Manifest]>>,
        chart: Option<ChartMetadata>,
    ) -> Result<ValidationResult> {
        let manifests: Arc<[Manifest]> = manifests.into();
        let start_time = chrono::Utc::now();
        let started = Instant::now();

        let (resolver, plugins) = {
            let resolver = read(&self.resolver).clone();
            let registry = read(&self.registry);
            (resolver, registry.snapshot())
        };

        let config = Arc::clone(resolver.config());
        let chart = chart.map(Arc::new);
        let contexts = plugins
            .iter()
            .map(|p| resolver.context_for(p.info(), chart.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let run = ExecutionCoordinator::new(Arc::clone(&config))
            .run(&plugins, Arc::clone(&manifests), contexts)
            .await?;

        let result = ResultAggregator::new().aggregate(
            run,
            RunInfo {
                plugin_names: plugins.iter().map(|p| p.name().to_string()).collect(),
                manifest_count: manifests.len(),
                start_time: Some(start_time),
                execution_time: started.elapsed(),
                environment: config.environment.clone(),
            },
        );

        info!(
            plugins = result.metadata.plugin_count,
            manifests = result.metadata.manifest_count,
            errors = result.error_count(),
            warnings = result.warning_count(),
            valid = result.valid,
            elapsed_ms = result.metadata.execution_time.as_millis() as u64,
            "validation finished"
        );

        Ok(result)
    }

    fn warn_unknown_overrides(&self) {
        let resolver = read(&self.resolver);
        let registry = read(&self.registry);
        log_unknown_overrides(&resolver, &registry);
    }
}

/// Validate with an optional engine
///
/// Without an engine the result is what an engine with no plugins returns.
pub async fn validate_optional(
    engine: Option<&PolicyEngine>,
    manifests: impl Into<Arc<[Manifest]>>,
    chart: Option<ChartMetadata>,
) -> Result<ValidationResult> {
    match engine {
        Some(engine) => engine.validate(manifests, chart).await,
        None => PolicyEngine::new().validate(manifests, chart).await,
    }
}

fn log_unknown_overrides(resolver: &ConfigurationResolver, registry: &PluginRegistry) {
    for unknown in resolver.unknown_overrides(registry) {
        match unknown.suggestion {
            Some(suggestion) => warn!(
                plugin = %unknown.name,
                "configuration names an unregistered plugin, did you mean '{}'?",
                suggestion
            ),
            None => warn!(
                plugin = %unknown.name,
                "configuration names an unregistered plugin"
            ),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
