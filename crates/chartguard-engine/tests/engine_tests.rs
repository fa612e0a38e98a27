//! End-to-end tests for the policy engine

use chartguard_core::{
    ChartMetadata, EngineOptions, Manifest, RetryOptions, Severity, ValidationContext,
    ValidationResult, Violation, manifests_from_yaml, resource_label,
};
use chartguard_engine::{
    EngineError, FnPlugin, Plugin, PluginDescriptor, PluginError, PluginResult, PolicyEngine,
    RegistrationError, async_trait,
};
use futures::FutureExt;
use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const MANIFESTS: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 5
  template:
    spec:
      containers:
        - name: web
          image: nginx:latest
---
apiVersion: v1
kind: Service
metadata:
  name: web
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: worker
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: worker
          image: registry.example.com/worker:1.4.2
          resources:
            limits:
              cpu: 500m
"#;

fn manifests() -> Vec<Manifest> {
    manifests_from_yaml(MANIFESTS).unwrap()
}

/// Flags containers using the `latest` tag or no tag at all
struct ImageTagPolicy;

#[async_trait]
impl Plugin for ImageTagPolicy {
    fn name(&self) -> &str {
        "image-tags"
    }

    fn version(&self) -> &str {
        "2.1.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Rejects mutable image tags")
    }

    async fn validate(&self, manifests: &[Manifest], _context: &ValidationContext) -> PluginResult {
        let mut found = Vec::new();
        for manifest in manifests {
            let containers = manifest["spec"]["template"]["spec"]["containers"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            for (i, container) in containers.iter().enumerate() {
                let image = container["image"].as_str().unwrap_or_default();
                if image.ends_with(":latest") || !image.contains(':') {
                    found.push(
                        Violation::error(
                            self.name(),
                            format!("image '{}' uses a mutable tag", image),
                        )
                        .with_resource_path(resource_label(manifest).unwrap_or_default())
                        .with_field(format!("spec.template.spec.containers[{}].image", i))
                        .with_suggestion("pin the image to a version tag or digest"),
                    );
                }
            }
        }
        Ok(found)
    }
}

/// Warns about containers without a CPU limit
fn cpu_limits() -> FnPlugin {
    FnPlugin::new(PluginDescriptor::new("cpu-limits", "1.0.0"), |manifests, _| {
        let mut found = Vec::new();
        for manifest in manifests {
            let Some(containers) = manifest["spec"]["template"]["spec"]["containers"].as_array()
            else {
                continue;
            };
            for container in containers {
                if container["resources"]["limits"]["cpu"].is_null() {
                    found.push(
                        Violation::warning("cpu-limits", "container has no CPU limit")
                            .with_resource_path(resource_label(manifest).unwrap_or_default())
                            .with_field("resources.limits.cpu"),
                    );
                }
            }
        }
        Ok(found)
    })
}

fn fixed(name: &str, severity: Severity, message: &str) -> FnPlugin {
    let (owned, message) = (name.to_string(), message.to_string());
    FnPlugin::new(PluginDescriptor::new(name, "1.0.0"), move |_, _| {
        Ok(vec![Violation::new(owned.clone(), severity, message.clone())])
    })
}

fn failing(name: &str) -> FnPlugin {
    FnPlugin::new(PluginDescriptor::new(name, "0.9.0"), |_, _| {
        Err(PluginError::new("policy bundle could not be loaded"))
    })
}

fn sleeping(name: &str, delay: Duration) -> FnPlugin {
    let owned = name.to_string();
    FnPlugin::new_async(PluginDescriptor::new(name, "1.0.0"), move |_, _| {
        let owned = owned.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(vec![Violation::info(owned, "finished")])
        }
        .boxed()
    })
}

fn findings(result: &ValidationResult) -> Vec<Violation> {
    result.findings().cloned().collect()
}

// ============================================================================
// Determinism
// ============================================================================

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    for parallel in [false, true] {
        let engine = PolicyEngine::builder()
            .plugin(ImageTagPolicy)
            .plugin(cpu_limits())
            .plugin(fixed("notes", Severity::Info, "chart reviewed"))
            .options(EngineOptions::new().parallel(parallel))
            .build()
            .unwrap();

        let first = engine.validate(manifests(), None).await.unwrap();
        for _ in 0..3 {
            let again = engine.validate(manifests(), None).await.unwrap();
            assert_eq!(again.violations, first.violations);
            assert_eq!(again.warnings, first.warnings);
            assert_eq!(again.valid, first.valid);
        }
    }
}

#[tokio::test]
async fn test_sequential_and_parallel_agree() {
    let build = |parallel: bool| {
        PolicyEngine::builder()
            .plugin(ImageTagPolicy)
            .plugin(cpu_limits())
            .options(EngineOptions::new().parallel(parallel))
            .build()
            .unwrap()
    };

    let sequential = build(false).validate(manifests(), None).await.unwrap();
    let parallel = build(true).validate(manifests(), None).await.unwrap();
    assert_eq!(findings(&sequential), findings(&parallel));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_order_follows_registration() {
    let engine = PolicyEngine::builder()
        .plugin(sleeping("slow", Duration::from_millis(300)))
        .plugin(sleeping("medium", Duration::from_millis(200)))
        .plugin(sleeping("fast", Duration::from_millis(100)))
        .options(EngineOptions::new().parallel(true))
        .build()
        .unwrap();

    let result = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();
    let order: Vec<_> = result.warnings.iter().map(|v| v.plugin.as_str()).collect();
    assert_eq!(order, vec!["slow", "medium", "fast"]);
}

// ============================================================================
// Registration integrity
// ============================================================================

#[test]
fn test_malformed_descriptors_are_rejected() {
    let engine = PolicyEngine::new();
    engine.register(fixed("existing", Severity::Info, "ok")).unwrap();

    for raw in [
        json!(null),
        json!({ "version": "1.0.0" }),
        json!({ "name": "no-version" }),
        json!({ "name": ["list"], "version": "1.0.0" }),
        json!({ "name": "bad-version", "version": 2 }),
    ] {
        let result = PluginDescriptor::from_value(&raw)
            .map(|d| FnPlugin::new(d, |_, _| Ok(vec![])))
            .and_then(|p| engine.register(p));
        assert!(
            matches!(result, Err(RegistrationError::InvalidPlugin { .. })),
            "expected {} to be rejected",
            raw
        );
        assert_eq!(engine.plugin_count(), 1);
    }
}

#[test]
fn test_descriptor_from_yaml_registers() {
    let raw: JsonValue = serde_yaml::from_str(
        r#"
name: replica-cap
version: 0.4.0
description: Caps replica counts
configSchema:
  properties:
    max:
      type: integer
metadata:
  author: platform-team
  tags: [scaling]
  defaultConfig:
    max: 3
"#,
    )
    .unwrap();

    let descriptor = PluginDescriptor::from_value(&raw).unwrap();
    let engine = PolicyEngine::new();
    engine
        .register(FnPlugin::new(descriptor, |_, _| Ok(vec![])))
        .unwrap();
    assert_eq!(engine.plugin_names(), vec!["replica-cap"]);
}

#[tokio::test]
async fn test_duplicate_name_keeps_first_registration() {
    let engine = PolicyEngine::new();
    engine
        .register(fixed("labels", Severity::Warning, "first"))
        .unwrap();

    let err = engine
        .register(fixed("labels", Severity::Error, "second"))
        .unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicatePlugin { .. }));
    assert_eq!(engine.plugin_count(), 1);

    let result = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();
    assert!(result.valid);
    assert_eq!(result.warnings[0].message, "first");
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_failing_plugin_is_isolated() {
    for parallel in [false, true] {
        let engine = PolicyEngine::builder()
            .plugin(fixed("a", Severity::Warning, "from a"))
            .plugin(failing("b"))
            .plugin(fixed("c", Severity::Warning, "from c"))
            .options(EngineOptions::new().parallel(parallel))
            .build()
            .unwrap();

        let result = engine.validate(manifests(), None).await.unwrap();

        assert!(!result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.warnings.len(), 2);

        let isolated = &result.violations[0];
        assert_eq!(isolated.plugin, "b");
        assert!(isolated.is_isolated());
        assert_eq!(isolated.context["errorType"], "execution");
        assert_eq!(isolated.context["pluginVersion"], "0.9.0");

        let summary = result.summary.unwrap();
        assert_eq!(summary.isolated_failures, vec!["b"]);
        assert_eq!(summary.violations_by_plugin["b"], 1);
    }
}

#[tokio::test]
async fn test_panicking_plugin_is_isolated() {
    let engine = PolicyEngine::builder()
        .plugin(FnPlugin::new(PluginDescriptor::new("panics", "1.0.0"), |manifests, _| {
            let first = &manifests[10];
            Ok(vec![Violation::info("panics", first.to_string())])
        }))
        .plugin(fixed("after", Severity::Warning, "still ran"))
        .build()
        .unwrap();

    let result = engine.validate(manifests(), None).await.unwrap();

    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].context["errorType"], "panic");
    assert_eq!(result.warnings[0].plugin, "after");
}

#[tokio::test]
async fn test_plugin_cannot_claim_isolated_failure() {
    let engine = PolicyEngine::builder()
        .plugin(FnPlugin::new(PluginDescriptor::new("sneaky", "1.0.0"), |_, _| {
            Ok(vec![Violation::warning("sneaky", "looks isolated").with_context("isolated", true)])
        }))
        .plugin(failing("broken"))
        .build()
        .unwrap();

    let result = engine.validate(manifests(), None).await.unwrap();

    assert!(!result.warnings[0].is_isolated());
    assert!(result.violations[0].is_isolated());
    let summary = result.summary.unwrap();
    assert_eq!(summary.isolated_failures, vec!["broken"]);
}

// ============================================================================
// Fail-fast
// ============================================================================

#[tokio::test]
async fn test_fail_fast_stops_after_first_error() {
    let second_ran = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&second_ran);

    let engine = PolicyEngine::builder()
        .plugin(fixed("p1", Severity::Error, "p1 found a problem"))
        .plugin(FnPlugin::new(PluginDescriptor::new("p2", "1.0.0"), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Violation::error("p2", "p2 found a problem")])
        }))
        .options(EngineOptions::new().fail_fast(true))
        .build()
        .unwrap();

    let result = engine.validate(manifests(), None).await.unwrap();

    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].message, "p1 found a problem");
    assert_eq!(second_ran.load(Ordering::SeqCst), 0);
    assert!(result.metadata.halted_early);
    assert_eq!(result.metadata.executed_plugins, 1);
    assert_eq!(result.metadata.plugin_count, 2);
}

#[tokio::test]
async fn test_fail_fast_ignores_warnings() {
    let engine = PolicyEngine::builder()
        .plugin(fixed("p1", Severity::Warning, "only a warning"))
        .plugin(fixed("p2", Severity::Info, "informational"))
        .options(EngineOptions::new().fail_fast(true))
        .build()
        .unwrap();

    let result = engine.validate(manifests(), None).await.unwrap();
    assert!(!result.metadata.halted_early);
    assert_eq!(result.warnings.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_parallel_aborts_slow_plugins() {
    let engine = PolicyEngine::builder()
        .plugin(sleeping("slow", Duration::from_secs(20)))
        .plugin(fixed("quick", Severity::Error, "bad"))
        .options(EngineOptions::new().parallel(true).fail_fast(true))
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();

    assert!(result.metadata.halted_early);
    assert_eq!(result.violations.len(), 1);
    assert!(result.warnings.is_empty());
    assert!(started.elapsed() < Duration::from_secs(20));
}

// ============================================================================
// Timeouts and retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_plugin_times_out() {
    let engine = PolicyEngine::builder()
        .plugin(sleeping("slow", Duration::from_secs(5)))
        .plugin(sleeping("fast", Duration::from_millis(10)))
        .options(EngineOptions::new().timeout(Duration::from_millis(500)))
        .build()
        .unwrap();

    let result = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();

    assert_eq!(result.violations.len(), 1);
    let timeout = &result.violations[0];
    assert_eq!(timeout.plugin, "slow");
    assert_eq!(timeout.context["errorType"], "timeout");
    assert_eq!(result.findings_for("slow").count(), 1);

    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].plugin, "fast");
    assert_eq!(result.warnings[0].message, "finished");
}

#[tokio::test]
async fn test_blocking_sync_plugin_times_out() {
    let engine = PolicyEngine::builder()
        .plugin(FnPlugin::new(PluginDescriptor::new("blocking", "1.0.0"), |_, _| {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(vec![])
        }))
        .plugin(fixed("after", Severity::Warning, "still ran"))
        .options(
            EngineOptions::new()
                .timeout(Duration::from_millis(100))
                .retry(RetryOptions {
                    retry_on_timeout: Some(false),
                    ..Default::default()
                }),
        )
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = engine.validate(manifests(), None).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].plugin, "blocking");
    assert_eq!(result.violations[0].context["errorType"], "timeout");
    assert_eq!(result.warnings[0].plugin, "after");
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_with_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = FnPlugin::new_async(PluginDescriptor::new("flaky", "1.0.0"), move |_, _| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(vec![Violation::info("flaky", "done")])
        }
        .boxed()
    });

    let engine = PolicyEngine::builder()
        .plugin(flaky)
        .options(
            EngineOptions::new()
                .timeout(Duration::from_secs(1))
                .retry(RetryOptions {
                    max_attempts: Some(2),
                    base_delay: Some(Duration::from_millis(250)),
                    ..Default::default()
                }),
        )
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();

    assert!(result.valid);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.metadata.plugins[0].attempts, 2);
    assert!(started.elapsed() >= Duration::from_millis(1250));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_attempts() {
    let engine = PolicyEngine::builder()
        .plugin(failing("broken"))
        .options(EngineOptions::new().retry(RetryOptions {
            max_attempts: Some(3),
            retry_on_plugin_error: Some(true),
            ..Default::default()
        }))
        .build()
        .unwrap();

    let result = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();

    assert_eq!(result.violations[0].context["attempts"], 3);
    assert_eq!(result.metadata.plugins[0].attempts, 3);
}

// ============================================================================
// Strict mode
// ============================================================================

#[tokio::test]
async fn test_strict_mode_rejects_on_failure() {
    for parallel in [false, true] {
        let engine = PolicyEngine::builder()
            .plugin(fixed("ok", Severity::Warning, "fine"))
            .plugin(failing("broken"))
            .options(
                EngineOptions::new()
                    .graceful_degradation(false)
                    .parallel(parallel),
            )
            .build()
            .unwrap();

        let err = engine.validate(manifests(), None).await.unwrap_err();
        match err {
            EngineError::PluginFailed { plugin, message, .. } => {
                assert_eq!(plugin, "broken");
                assert_eq!(message, "policy bundle could not be loaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_timeout_error() {
    let engine = PolicyEngine::builder()
        .plugin(sleeping("slow", Duration::from_secs(5)))
        .options(
            EngineOptions::new()
                .graceful_degradation(false)
                .timeout(Duration::from_millis(100)),
        )
        .build()
        .unwrap();

    let err = engine.validate(Vec::<Manifest>::new(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::PluginTimedOut { attempts: 1, .. }));
}

// ============================================================================
// Configuration
// ============================================================================

fn config_recorder(seen: Arc<Mutex<Option<ValidationContext>>>) -> FnPlugin {
    FnPlugin::new(
        PluginDescriptor::new("recorder", "1.0.0").with_default_config(json!({ "a": 1, "b": 2 })),
        move |_, ctx| {
            if let Ok(mut slot) = seen.lock() {
                *slot = Some(ctx.clone());
            }
            Ok(vec![])
        },
    )
}

#[tokio::test]
async fn test_config_layers_reach_plugin() {
    let seen = Arc::new(Mutex::new(None));
    let engine = PolicyEngine::new();
    engine.register(config_recorder(Arc::clone(&seen))).unwrap();
    engine
        .configure(EngineOptions::new().plugin_config("recorder", json!({ "b": 3, "c": 4 })))
        .unwrap();

    engine.validate(Vec::<Manifest>::new(), None).await.unwrap();

    let ctx = seen.lock().unwrap().clone().unwrap();
    assert_eq!(
        JsonValue::Object(ctx.config().clone()),
        json!({ "a": 1, "b": 3, "c": 4 })
    );
    assert_eq!(ctx.environment(), None);
}

#[tokio::test]
async fn test_environment_overrides_apply() {
    let seen = Arc::new(Mutex::new(None));
    let engine = PolicyEngine::builder()
        .plugin(config_recorder(Arc::clone(&seen)))
        .options(
            EngineOptions::from_yaml_str(
                r#"
pluginConfig:
  recorder:
    b: 3
environments:
  production:
    recorder:
      b: 30
      d: true
"#,
            )
            .unwrap(),
        )
        .build()
        .unwrap();

    engine.configure(EngineOptions::new().environment("production")).unwrap();
    let chart = ChartMetadata::new("web", "1.2.3");
    let result = engine.validate(manifests(), Some(chart)).await.unwrap();

    let ctx = seen.lock().unwrap().clone().unwrap();
    assert_eq!(
        JsonValue::Object(ctx.config().clone()),
        json!({ "a": 1, "b": 30, "d": true })
    );
    assert_eq!(ctx.environment(), Some("production"));
    assert_eq!(ctx.chart().map(|c| c.version.as_str()), Some("1.2.3"));
    assert_eq!(result.metadata.environment.as_deref(), Some("production"));
}

#[tokio::test]
async fn test_registration_during_run_uses_snapshot() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (started_tx, release_rx) = (Arc::clone(&started), Arc::clone(&release));

    let gated = FnPlugin::new_async(PluginDescriptor::new("gated", "1.0.0"), move |_, _| {
        let (started, release) = (Arc::clone(&started_tx), Arc::clone(&release_rx));
        async move {
            started.notify_one();
            release.notified().await;
            Ok(vec![])
        }
        .boxed()
    });
    let engine = Arc::new(PolicyEngine::builder().plugin(gated).build().unwrap());

    let runner = Arc::clone(&engine);
    let run = tokio::spawn(async move { runner.validate(Vec::<Manifest>::new(), None).await });

    started.notified().await;
    engine.register(fixed("late", Severity::Error, "late")).unwrap();
    engine.configure(EngineOptions::new().fail_fast(true)).unwrap();
    release.notify_one();

    let result = run.await.unwrap().unwrap();
    assert!(result.valid);
    assert_eq!(result.metadata.plugin_count, 1);

    release.notify_one();
    let after = engine.validate(Vec::<Manifest>::new(), None).await.unwrap();
    assert_eq!(after.metadata.plugin_count, 2);
    assert!(!after.valid);
}

// ============================================================================
// Empty input and report shape
// ============================================================================

#[tokio::test]
async fn test_engine_without_plugins() {
    let result = PolicyEngine::new()
        .validate(manifests(), None)
        .await
        .unwrap();

    assert!(result.valid);
    assert!(result.violations.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(result.metadata.plugin_count, 0);
    assert_eq!(result.metadata.manifest_count, 3);

    let summary = result.summary.unwrap();
    assert_eq!(
        serde_json::to_value(summary.violations_by_severity).unwrap(),
        json!({ "error": 0, "warning": 0, "info": 0 })
    );
}

#[tokio::test]
async fn test_full_report() {
    let engine = PolicyEngine::builder()
        .plugin(ImageTagPolicy)
        .plugin(cpu_limits())
        .build()
        .unwrap();

    let result = engine.validate(manifests(), None).await.unwrap();

    assert!(!result.valid);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].resource_path.as_deref(), Some("Deployment/web"));
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].resource_path.as_deref(), Some("Deployment/web"));

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.total_violations, 2);
    assert_eq!(summary.violations_by_plugin["image-tags"], 1);
    assert_eq!(summary.violations_by_plugin["cpu-limits"], 1);

    insta::assert_json_snapshot!(result.violations, @r###"
    [
      {
        "plugin": "image-tags",
        "severity": "error",
        "message": "image 'nginx:latest' uses a mutable tag",
        "resourcePath": "Deployment/web",
        "field": "spec.template.spec.containers[0].image",
        "suggestion": "pin the image to a version tag or digest"
      }
    ]
    "###);

    let yaml = result.to_yaml().unwrap();
    assert!(yaml.contains("valid: false"));
}
