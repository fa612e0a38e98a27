//! Plugin execution
//!
//! Every invocation is bounded by the configured timeout, retried according
//! to the retry policy, and shielded from plugin panics. What a final failure
//! becomes (an isolated finding or a failed run) is decided by
//! `gracefulDegradation`.

use chartguard_core::{
    EngineConfig, ISOLATED_KEY, Manifest, PLUGIN_EXECUTION_PATH, PluginStatus, RetryConfig,
    ValidationContext, Violation,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::registry::RegisteredPlugin;

/// Why an invocation did not produce findings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The invocation exceeded the timeout and was cancelled
    Timeout,
    /// The plugin returned an error
    Execution,
    /// The plugin panicked
    Panic,
}

impl FailureKind {
    /// Value recorded as `errorType` on the synthesized finding
    pub fn error_type(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Execution => "execution",
            FailureKind::Panic => "panic",
        }
    }

    fn is_retryable(&self, retry: &RetryConfig) -> bool {
        match self {
            FailureKind::Timeout => retry.retry_on_timeout,
            FailureKind::Execution | FailureKind::Panic => retry.retry_on_plugin_error,
        }
    }
}

/// A failed invocation attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct InvocationFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl InvocationFailure {
    fn timeout(limit: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            detail: format!("timed out after {}ms", limit.as_millis()),
        }
    }

    fn panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self {
            kind: FailureKind::Panic,
            detail: format!("panicked: {}", message),
        }
    }

    pub fn error_type(&self) -> &'static str {
        self.kind.error_type()
    }
}

/// Settled result of one plugin in a run
#[derive(Debug, Clone)]
pub struct PluginOutcome {
    /// Position in registration order
    pub index: usize,
    pub name: String,
    pub version: String,
    pub attempts: u32,
    pub duration: Duration,
    pub status: PluginStatus,
    pub violations: Vec<Violation>,
    /// Final failure, when every attempt failed
    pub failure: Option<InvocationFailure>,
}

impl PluginOutcome {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(Violation::is_error)
    }
}

/// Outcomes of one run, in registration order
#[derive(Debug, Clone, Default)]
pub struct CoordinatorRun {
    pub outcomes: Vec<PluginOutcome>,
    /// Fail-fast stopped the run before every plugin settled
    pub halted_early: bool,
}

/// Schedules plugin invocations for one configuration snapshot
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    config: Arc<EngineConfig>,
}

impl ExecutionCoordinator {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Run every plugin once with its own context
    ///
    /// `plugins` and `contexts` are paired by position.
    pub async fn run(
        &self,
        plugins: &[RegisteredPlugin],
        manifests: Arc<[Manifest]>,
        contexts: Vec<ValidationContext>,
    ) -> Result<CoordinatorRun> {
        let invocations: Vec<Invocation> = plugins
            .iter()
            .cloned()
            .zip(contexts)
            .enumerate()
            .map(|(index, (plugin, context))| Invocation {
                index,
                plugin,
                context,
                manifests: Arc::clone(&manifests),
                timeout: self.config.timeout,
                retry: self.config.retry.clone(),
                graceful: self.config.graceful_degradation,
            })
            .collect();

        if self.config.parallel {
            self.run_parallel(invocations).await
        } else {
            self.run_sequential(invocations).await
        }
    }

    async fn run_sequential(&self, invocations: Vec<Invocation>) -> Result<CoordinatorRun> {
        let total = invocations.len();
        let mut run = CoordinatorRun::default();

        for invocation in invocations {
            let outcome = invocation.execute().await;
            self.check_strict(&outcome)?;

            let halt = self.config.fail_fast && outcome.has_errors();
            run.outcomes.push(outcome);
            if halt {
                run.halted_early = run.outcomes.len() < total;
                break;
            }
        }

        Ok(run)
    }

    async fn run_parallel(&self, invocations: Vec<Invocation>) -> Result<CoordinatorRun> {
        let total = invocations.len();
        let mut tasks = JoinSet::new();
        for invocation in invocations {
            tasks.spawn(invocation.execute());
        }

        let mut run = CoordinatorRun::default();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tasks.abort_all();
                    return Err(EngineError::Task {
                        message: e.to_string(),
                    });
                }
            };

            if let Err(e) = self.check_strict(&outcome) {
                tasks.abort_all();
                return Err(e);
            }

            let halt = self.config.fail_fast && outcome.has_errors();
            run.outcomes.push(outcome);
            if halt {
                run.halted_early = run.outcomes.len() < total;
                tasks.abort_all();
                break;
            }
        }

        run.outcomes.sort_by_key(|o| o.index);
        Ok(run)
    }

    /// Without graceful degradation a final failure fails the run
    fn check_strict(&self, outcome: &PluginOutcome) -> Result<()> {
        if self.config.graceful_degradation {
            return Ok(());
        }
        match &outcome.failure {
            None => Ok(()),
            Some(failure) if failure.kind == FailureKind::Timeout => {
                Err(EngineError::PluginTimedOut {
                    plugin: outcome.name.clone(),
                    timeout: self.config.timeout,
                    attempts: outcome.attempts,
                })
            }
            Some(failure) => Err(EngineError::PluginFailed {
                plugin: outcome.name.clone(),
                message: failure.detail.clone(),
                attempts: outcome.attempts,
            }),
        }
    }
}

/// Everything one plugin invocation owns
struct Invocation {
    index: usize,
    plugin: RegisteredPlugin,
    context: ValidationContext,
    manifests: Arc<[Manifest]>,
    timeout: Duration,
    retry: RetryConfig,
    graceful: bool,
}

impl Invocation {
    async fn execute(self) -> PluginOutcome {
        let name = self.plugin.name().to_string();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let result = loop {
            attempt += 1;
            debug!(plugin = %name, attempt, "invoking plugin");
            let attempt_started = Instant::now();

            match self.invoke_once().await {
                Ok(violations) => {
                    debug!(
                        plugin = %name,
                        attempt,
                        elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                        findings = violations.len(),
                        "plugin finished"
                    );
                    break Ok(violations);
                }
                Err(failure) => {
                    warn!(
                        plugin = %name,
                        attempt,
                        error_type = failure.error_type(),
                        elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                        "plugin attempt failed: {}",
                        failure
                    );

                    if attempt < self.retry.max_attempts && failure.kind.is_retryable(&self.retry) {
                        let delay = self.retry.delay_before_retry(attempt);
                        warn!(
                            plugin = %name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying plugin"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break Err(failure);
                }
            }
        };

        let duration = started.elapsed();
        match result {
            Ok(mut violations) => {
                // Only the engine marks findings as isolated failures
                for violation in &mut violations {
                    violation.plugin.clone_from(&name);
                    violation.context.remove(ISOLATED_KEY);
                }
                PluginOutcome {
                    index: self.index,
                    name,
                    version: self.plugin.version().to_string(),
                    attempts: attempt,
                    duration,
                    status: PluginStatus::Completed,
                    violations,
                    failure: None,
                }
            }
            Err(failure) => {
                let violations = if self.graceful {
                    warn!(
                        plugin = %name,
                        attempts = attempt,
                        error_type = failure.error_type(),
                        "isolating plugin failure"
                    );
                    vec![isolated_violation(&self.plugin, &failure, attempt)]
                } else {
                    Vec::new()
                };
                PluginOutcome {
                    index: self.index,
                    name,
                    version: self.plugin.version().to_string(),
                    attempts: attempt,
                    duration,
                    status: PluginStatus::Failed,
                    violations,
                    failure: Some(failure),
                }
            }
        }
    }

    /// One bounded, panic-safe call to the plugin
    async fn invoke_once(&self) -> std::result::Result<Vec<Violation>, InvocationFailure> {
        let call = AssertUnwindSafe(
            self.plugin
                .plugin()
                .validate(&self.manifests, &self.context),
        )
        .catch_unwind();

        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(InvocationFailure::timeout(self.timeout)),
            Ok(Err(payload)) => Err(InvocationFailure::panic(&*payload)),
            Ok(Ok(Err(e))) => Err(InvocationFailure {
                kind: FailureKind::Execution,
                detail: e.to_string(),
            }),
            Ok(Ok(Ok(violations))) => Ok(violations),
        }
    }
}

/// Finding that stands in for a plugin that failed every attempt
fn isolated_violation(
    plugin: &RegisteredPlugin,
    failure: &InvocationFailure,
    attempts: u32,
) -> Violation {
    let name = plugin.name();
    let suggestion = match failure.kind {
        FailureKind::Timeout => format!(
            "Plugin '{}' did not finish in time; raise the engine timeout or check the plugin for slow operations",
            name
        ),
        FailureKind::Execution | FailureKind::Panic => format!(
            "Check the implementation and configuration of plugin '{}'",
            name
        ),
    };

    Violation::error(name, format!("Plugin '{}' failed: {}", name, failure.detail))
        .with_resource_path(PLUGIN_EXECUTION_PATH)
        .with_field("validate")
        .with_suggestion(suggestion)
        .with_context(ISOLATED_KEY, true)
        .with_context("pluginVersion", plugin.version())
        .with_context("errorType", failure.error_type())
        .with_context("timestamp", chrono::Utc::now().to_rfc3339())
        .with_context("attempts", attempts)
}
