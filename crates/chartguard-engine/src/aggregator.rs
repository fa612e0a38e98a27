//! Result aggregation
//!
//! Turns the outcomes of one run into the final report.

use chartguard_core::{
    PluginExecution, PluginStatus, RunMetadata, SeverityCounts, ValidationResult,
    ValidationSummary, ViolationFrequency,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::time::Duration;

use crate::coordinator::CoordinatorRun;

/// Number of entries kept in `mostCommonViolations`
pub const MOST_COMMON_LIMIT: usize = 10;

/// Run-level facts the aggregator does not derive itself
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    /// Registered plugin names, in registration order
    pub plugin_names: Vec<String>,
    pub manifest_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    /// Wall-clock duration of the whole run
    pub execution_time: Duration,
    pub environment: Option<String>,
}

/// Builds a [`ValidationResult`] from settled plugin outcomes
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, run: CoordinatorRun, info: RunInfo) -> ValidationResult {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut by_severity = SeverityCounts::default();
        let mut by_plugin: IndexMap<String, usize> =
            info.plugin_names.iter().map(|name| (name.clone(), 0)).collect();
        let mut frequencies: IndexMap<(String, Option<String>), usize> = IndexMap::new();
        let mut isolated_failures = Vec::new();
        let mut executions = Vec::with_capacity(run.outcomes.len());
        let executed_plugins = run.outcomes.len();

        for outcome in run.outcomes {
            executions.push(PluginExecution {
                name: outcome.name.clone(),
                status: outcome.status,
                attempts: outcome.attempts,
                duration: outcome.duration,
            });
            if outcome.status == PluginStatus::Failed {
                isolated_failures.push(outcome.name.clone());
            }

            *by_plugin.entry(outcome.name).or_default() += outcome.violations.len();

            for violation in outcome.violations {
                by_severity.record(violation.severity);
                *frequencies
                    .entry((violation.message.clone(), violation.field.clone()))
                    .or_default() += 1;

                if violation.is_error() {
                    violations.push(violation);
                } else {
                    warnings.push(violation);
                }
            }
        }

        let mut most_common: Vec<ViolationFrequency> = frequencies
            .into_iter()
            .map(|((message, field), count)| ViolationFrequency {
                message,
                field,
                count,
            })
            .collect();
        // Stable sort keeps first-appearance order among equal counts
        most_common.sort_by(|a, b| b.count.cmp(&a.count));
        most_common.truncate(MOST_COMMON_LIMIT);

        let summary = ValidationSummary {
            total_violations: by_severity.total(),
            violations_by_severity: by_severity,
            violations_by_plugin: by_plugin,
            most_common_violations: most_common,
            isolated_failures,
        };

        let metadata = RunMetadata {
            plugin_count: info.plugin_names.len(),
            manifest_count: info.manifest_count,
            execution_time: info.execution_time,
            start_time: info.start_time,
            environment: info.environment,
            executed_plugins,
            halted_early: run.halted_early,
            plugins: executions,
        };

        ValidationResult {
            valid: violations.is_empty(),
            violations,
            warnings,
            summary: Some(summary),
            metadata,
        }
    }
}
