//! End-to-end tests driving the engine with scripted step runners.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use freightline_config::{HealthCheckStep, Step, StepRetry};
use freightline_credentials::{
  CredentialType, Credentials, CredentialsDatabase, InMemoryCredentialsDatabase,
};
use freightline_promotion::{
  BoxError, Context, Engine, EngineConfig, ExecutorConfig, FailedError, PromotionError,
  PromotionPhase, PromotionResult, StepContext, StepPhase, StepResult, StepRunner,
  StepRunnerCapability, StepRunnerMetadata, StepRunnerRegistry, TerminalError,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

type Script = Arc<dyn Fn(&StepContext, usize) -> Result<StepResult, BoxError> + Send + Sync>;

/// Runs a script, passing the 1-based invocation number.
struct ScriptedRunner {
  kind: String,
  script: Script,
  calls: Arc<AtomicUsize>,
}

#[async_trait]
impl StepRunner for ScriptedRunner {
  fn name(&self) -> &str {
    &self.kind
  }

  async fn run(
    &self,
    ctx: &StepContext,
    _cancel: CancellationToken,
  ) -> Result<StepResult, BoxError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    (self.script)(ctx, call)
  }
}

/// Looks up git credentials for the configured repository.
struct CredentialsRunner {
  credentials: Option<Arc<dyn CredentialsDatabase>>,
}

#[async_trait]
impl StepRunner for CredentialsRunner {
  fn name(&self) -> &str {
    "git-credentials"
  }

  async fn run(
    &self,
    ctx: &StepContext,
    _cancel: CancellationToken,
  ) -> Result<StepResult, BoxError> {
    let Some(db) = &self.credentials else {
      return Err(TerminalError::new("credentials capability not injected").into());
    };
    let repo_url = ctx
      .config
      .as_ref()
      .and_then(|c| c.get("repoURL"))
      .and_then(Value::as_str)
      .unwrap_or_default();
    let username = db
      .get(&ctx.project, CredentialType::Git, repo_url)
      .await?
      .map(|c| c.username)
      .unwrap_or_default();
    Ok(StepResult::succeeded().with_output(output(json!({ "username": username }))))
  }
}

fn output(value: Value) -> Map<String, Value> {
  value.as_object().cloned().unwrap_or_default()
}

struct Harness {
  registry: StepRunnerRegistry,
  executor_config: ExecutorConfig,
}

impl Harness {
  fn new() -> Self {
    Self {
      registry: StepRunnerRegistry::new(),
      executor_config: ExecutorConfig::default(),
    }
  }

  fn script<F>(&mut self, kind: &str, script: F) -> Arc<AtomicUsize>
  where
    F: Fn(&StepContext, usize) -> Result<StepResult, BoxError> + Send + Sync + 'static,
  {
    self.script_with(kind, StepRunnerMetadata::new(), script)
  }

  fn script_with<F>(
    &mut self,
    kind: &str,
    metadata: StepRunnerMetadata,
    script: F,
  ) -> Arc<AtomicUsize>
  where
    F: Fn(&StepContext, usize) -> Result<StepResult, BoxError> + Send + Sync + 'static,
  {
    let calls = Arc::new(AtomicUsize::new(0));
    let script: Script = Arc::new(script);
    let kind_name = kind.to_string();
    let counter = calls.clone();
    self
      .registry
      .register(kind, metadata, move |_| {
        Box::new(ScriptedRunner {
          kind: kind_name.clone(),
          script: script.clone(),
          calls: counter.clone(),
        })
      })
      .unwrap();
    calls
  }

  fn engine(self) -> Engine {
    Engine::new(
      EngineConfig::default(),
      Arc::new(self.registry),
      self.executor_config,
    )
  }
}

fn context() -> Context {
  Context::new("demo", "prod", "prod.1")
}

fn step(kind: &str, alias: &str) -> Step {
  Step::new(kind, alias)
}

fn with_retry(mut step: Step, error_threshold: Option<u32>, timeout_ms: Option<u64>) -> Step {
  step.retry = Some(StepRetry {
    error_threshold,
    timeout_ms,
  });
  step
}

fn with_if(mut step: Step, condition: &str) -> Step {
  step.if_expr = Some(condition.to_string());
  step
}

fn resumed(result: &PromotionResult) -> Context {
  let mut ctx = context();
  ctx.resume(result.checkpoint());
  ctx
}

fn status_of(result: &PromotionResult, alias: &str) -> StepPhase {
  result
    .step_execution_metadata
    .get(alias)
    .map(|m| m.status)
    .unwrap_or_default()
}

async fn promote(engine: &Engine, ctx: Context, steps: &[Step]) -> PromotionResult {
  engine.promote(ctx, steps, &CancellationToken::new()).await
}

#[tokio::test]
async fn test_all_steps_succeed() {
  let mut harness = Harness::new();
  let calls = harness.script("ok", |ctx, _| {
    Ok(StepResult::succeeded().with_output(output(json!({ "alias": ctx.alias }))))
  });
  let engine = harness.engine();

  let steps = [step("ok", "a"), step("ok", "b"), step("ok", "")];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Succeeded);
  assert_eq!(result.message, "all steps completed successfully");
  assert_eq!(result.current_step, 2);
  assert!(result.error.is_none());
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  assert_eq!(result.state.get("step-2"), Some(&json!({ "alias": "step-2" })));
  for meta in result.step_execution_metadata.iter() {
    assert_eq!(meta.status, StepPhase::Succeeded);
    assert!(meta.started_at.is_some());
    assert!(meta.finished_at.is_some());
  }
}

#[tokio::test]
async fn test_resume_matches_full_run() {
  let mut harness = Harness::new();
  harness.script("ok", |ctx, _| {
    Ok(StepResult::succeeded().with_output(output(json!({ "alias": ctx.alias }))))
  });
  let engine = harness.engine();
  let steps = [step("ok", "a"), step("ok", "b"), step("ok", "c")];

  let full = promote(&engine, context(), &steps).await;

  let mut ctx = context();
  for alias in ["a", "b"] {
    let i = ctx.step_execution_metadata.ensure(alias, false);
    ctx.step_execution_metadata[i]
      .started()
      .with_status(StepPhase::Succeeded)
      .finished();
    ctx.state.set(alias, json!({ "alias": alias }));
  }
  ctx.start_from_step = 2;
  let resumed = promote(&engine, ctx, &steps).await;

  assert_eq!(resumed.status, full.status);
  assert_eq!(resumed.message, full.message);
  assert_eq!(resumed.current_step, full.current_step);
  assert_eq!(resumed.state, full.state);
  for alias in ["a", "b", "c"] {
    assert_eq!(status_of(&resumed, alias), status_of(&full, alias));
  }
}

#[tokio::test]
async fn test_false_condition_skips_without_running() {
  let mut harness = Harness::new();
  let calls = harness.script("ok", |_, _| {
    Ok(StepResult::succeeded().with_output(output(json!({ "ran": true }))))
  });
  let engine = harness.engine();

  let steps = [with_if(step("ok", "a"), "${{ ctx.stage == 'dev' }}")];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Succeeded);
  assert_eq!(status_of(&result, "a"), StepPhase::Skipped);
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert!(!result.state.contains_key("a"));
}

#[tokio::test]
async fn test_recoverable_error_below_threshold_keeps_running() {
  let mut harness = Harness::new();
  harness.script("flaky", |_, _| Err("connection reset".into()));
  let engine = harness.engine();

  let steps = [with_retry(step("flaky", "a"), Some(3), None)];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Running);
  assert_eq!(result.current_step, 0);
  assert!(result.error.is_some());
  let meta = result.step_execution_metadata.get("a").unwrap();
  assert!(meta.finished_at.is_none());
  assert_eq!(meta.error_count, 1);
  assert_eq!(meta.status, StepPhase::Errored);
}

#[tokio::test]
async fn test_threshold_reached_across_invocations() {
  let mut harness = Harness::new();
  let calls = harness.script("flaky", |_, _| Err("connection reset".into()));
  let engine = harness.engine();
  let steps = [with_retry(step("flaky", "a"), Some(3), None)];

  let first = promote(&engine, context(), &steps).await;
  assert_eq!(first.status, PromotionPhase::Running);
  let second = promote(&engine, resumed(&first), &steps).await;
  assert_eq!(second.status, PromotionPhase::Running);
  assert_eq!(
    second.step_execution_metadata.get("a").map(|m| m.error_count),
    Some(2)
  );

  let third = promote(&engine, resumed(&second), &steps).await;
  assert_eq!(third.status, PromotionPhase::Errored);
  assert_eq!(third.current_step, 0);
  let meta = third.step_execution_metadata.get("a").unwrap();
  assert!(meta.finished_at.is_some());
  assert_eq!(meta.error_count, 3);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_terminal_error_ignores_threshold() {
  let mut harness = Harness::new();
  let calls = harness.script("push", |_, _| {
    Err(TerminalError::new("non-fast-forward").into())
  });
  let engine = harness.engine();

  let steps = [with_retry(step("push", "a"), Some(100), None)];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(
    result
      .step_execution_metadata
      .get("a")
      .is_some_and(|m| m.finished_at.is_some() && m.message.contains("non-fast-forward"))
  );
}

#[tokio::test]
async fn test_failed_step_skips_unconditional_followers() {
  let mut harness = Harness::new();
  harness.script("verify", |_, _| Err(FailedError::new("tests failed").into()));
  let ok = harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  let engine = harness.engine();

  let steps = [
    step("verify", "verify"),
    step("ok", "deploy"),
    with_if(step("ok", "cleanup"), "${{ always() }}"),
    with_if(step("ok", "notify"), "failure() and status('verify') == 'Failed'"),
  ];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Failed);
  assert!(result.message.contains("tests failed"));
  assert_eq!(status_of(&result, "verify"), StepPhase::Failed);
  assert_eq!(status_of(&result, "deploy"), StepPhase::Skipped);
  assert_eq!(status_of(&result, "cleanup"), StepPhase::Succeeded);
  assert_eq!(status_of(&result, "notify"), StepPhase::Succeeded);
  assert_eq!(ok.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_continue_on_error_does_not_fail_promotion() {
  let mut harness = Harness::new();
  harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  harness.script("lint", |_, _| Ok(StepResult::failed("lint warnings")));
  let engine = harness.engine();

  let mut lint = step("lint", "lint");
  lint.continue_on_error = true;
  let steps = [step("ok", "a"), lint, step("ok", "b")];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Succeeded);
  assert_eq!(status_of(&result, "lint"), StepPhase::Failed);
  assert_eq!(status_of(&result, "b"), StepPhase::Succeeded);
}

#[tokio::test]
async fn test_task_output_propagation() {
  let mut harness = Harness::new();
  harness.script_with(
    "task-step",
    StepRunnerMetadata::new().with_capability(StepRunnerCapability::TaskOutputPropagation),
    |_, _| Ok(StepResult::succeeded().with_output(output(json!({ "k": "v" })))),
  );
  harness.script("echo", |ctx, _| {
    Ok(StepResult::succeeded().with_output(ctx.config.clone().unwrap_or_default()))
  });
  let engine = harness.engine();

  let mut echo = step("echo", "task::y");
  echo.config = Some(json!({ "seen": "${{ task.outputs.x.k }}" }));
  let steps = [step("task-step", "task::x"), echo];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Succeeded);
  assert_eq!(result.state.get("task::x"), Some(&json!({ "k": "v" })));
  assert_eq!(result.state.get("task"), Some(&json!({ "x": { "k": "v" } })));
  assert_eq!(result.state.get("task::y"), Some(&json!({ "seen": "v" })));
}

#[tokio::test]
async fn test_cancellation_errors_in_progress_step() {
  let mut harness = Harness::new();
  harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  harness.script("wait", |_, _| Ok(StepResult::running().with_message("waiting for sync")));
  let engine = harness.engine();
  let steps = [step("ok", "a"), step("wait", "b"), step("ok", "c")];

  let first = promote(&engine, context(), &steps).await;
  assert_eq!(first.status, PromotionPhase::Running);
  assert_eq!(first.current_step, 1);
  assert_eq!(first.message, "waiting for sync");

  let cancel = CancellationToken::new();
  cancel.cancel();
  let second = engine.promote(resumed(&first), &steps, &cancel).await;

  assert_eq!(second.status, PromotionPhase::Errored);
  assert_eq!(second.current_step, 1);
  assert!(matches!(second.error, Some(PromotionError::Cancelled)));
  let meta = second.step_execution_metadata.get("b").unwrap();
  assert_eq!(meta.status, StepPhase::Errored);
  assert!(meta.message.contains("cancelled"));
  assert!(meta.finished_at.is_some());
  assert!(second.step_execution_metadata.get("c").is_none());
}

#[tokio::test]
async fn test_panic_is_contained() {
  let mut harness = Harness::new();
  harness.script("boom", |_, _| panic!("runner exploded"));
  let cleanup = harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  let engine = harness.engine();

  let steps = [
    with_retry(step("boom", "a"), Some(10), None),
    with_if(step("ok", "cleanup"), "always()"),
  ];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  let meta = result.step_execution_metadata.get("a").unwrap();
  assert!(meta.finished_at.is_some());
  assert!(meta.message.contains("runner exploded"));
  assert_eq!(cleanup.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_runner_soft_continues() {
  let mut harness = Harness::new();
  let calls = harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  let engine = harness.engine();

  let steps = [
    step("does-not-exist", "a"),
    with_if(step("ok", "b"), "${{ always() }}"),
  ];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  assert!(result.message.contains("does-not-exist"));
  assert_eq!(status_of(&result, "b"), StepPhase::Succeeded);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_condition_soft_continues() {
  let mut harness = Harness::new();
  harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  let engine = harness.engine();

  let steps = [
    with_if(step("ok", "a"), "${{ ctx.stage }}"),
    with_if(step("ok", "b"), "always()"),
  ];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  assert_eq!(status_of(&result, "a"), StepPhase::Errored);
  assert_eq!(status_of(&result, "b"), StepPhase::Succeeded);
}

#[tokio::test]
async fn test_bad_config_errors_step_and_continues() {
  let mut harness = Harness::new();
  let calls = harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  let engine = harness.engine();

  let mut broken = step("ok", "a");
  broken.config = Some(json!({ "x": "${{ vars. }}" }));
  let steps = [broken, with_if(step("ok", "b"), "${{ always() }}")];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  let a = result.step_execution_metadata.get("a").unwrap();
  assert_eq!(a.status, StepPhase::Errored);
  assert!(a.started_at.is_some());
  assert!(a.finished_at.is_some());
  assert_eq!(status_of(&result, "b"), StepPhase::Succeeded);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_elapsed_since_start() {
  let mut harness = Harness::new();
  harness.script("wait", |_, _| Ok(StepResult::running()));
  let engine = harness.engine();
  let steps = [with_retry(step("wait", "a"), None, Some(60_000))];

  let first = promote(&engine, context(), &steps).await;
  assert_eq!(first.status, PromotionPhase::Running);

  let mut ctx = resumed(&first);
  if let Some(meta) = ctx.step_execution_metadata.get_mut("a") {
    meta.started_at = Some(Utc::now() - chrono::Duration::hours(1));
  }
  let second = promote(&engine, ctx, &steps).await;

  assert_eq!(second.status, PromotionPhase::Errored);
  let meta = second.step_execution_metadata.get("a").unwrap();
  assert!(meta.message.contains("timed out"));
  assert!(meta.finished_at.is_some());
}

#[tokio::test]
async fn test_registration_defaults_apply() {
  let mut harness = Harness::new();
  let calls = harness.script_with(
    "flaky",
    StepRunnerMetadata::new().with_default_error_threshold(2),
    |_, _| Err("connection reset".into()),
  );
  let engine = harness.engine();
  let steps = [step("flaky", "a")];

  let first = promote(&engine, context(), &steps).await;
  assert_eq!(first.status, PromotionPhase::Running);
  let second = promote(&engine, resumed(&first), &steps).await;
  assert_eq!(second.status, PromotionPhase::Errored);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_self_reported_errored_is_retried_like_an_error() {
  let mut harness = Harness::new();
  harness.script("degraded", |_, call| {
    if call == 1 {
      Ok(StepResult::errored("registry unavailable"))
    } else {
      Ok(StepResult::succeeded())
    }
  });
  let engine = harness.engine();
  let steps = [with_retry(step("degraded", "a"), Some(2), None)];

  let first = promote(&engine, context(), &steps).await;
  assert_eq!(first.status, PromotionPhase::Running);
  assert!(matches!(first.error, Some(PromotionError::StepErrored { .. })));

  let second = promote(&engine, resumed(&first), &steps).await;
  assert_eq!(second.status, PromotionPhase::Succeeded);
}

#[tokio::test]
async fn test_pending_status_is_invalid() {
  let mut harness = Harness::new();
  harness.script("confused", |_, _| Ok(StepResult::default()));
  let engine = harness.engine();

  let result = promote(&engine, context(), &[step("confused", "a")]).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  assert!(result.message.contains("invalid status"));
}

#[tokio::test]
async fn test_duplicate_alias_runs_nothing() {
  let mut harness = Harness::new();
  let calls = harness.script("ok", |_, _| Ok(StepResult::succeeded()));
  let engine = harness.engine();

  let steps = [step("ok", "a"), step("ok", "a")];
  let result = promote(&engine, context(), &steps).await;

  assert_eq!(result.status, PromotionPhase::Errored);
  assert!(matches!(
    result.error,
    Some(PromotionError::DuplicateAlias { ref alias }) if alias == "a"
  ));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_checks_and_retry_after() {
  let mut harness = Harness::new();
  harness.script("sync", |_, _| {
    Ok(StepResult::succeeded().with_health_check(HealthCheckStep {
      kind: "platform-app".to_string(),
      config: json!({ "name": "app" }),
    }))
  });
  harness.script("wait", |_, call| {
    if call == 1 {
      Ok(StepResult::running().with_retry_after(Duration::from_secs(30)))
    } else {
      Ok(StepResult::succeeded())
    }
  });
  let engine = harness.engine();
  let steps = [step("sync", "sync"), step("wait", "wait")];

  let first = promote(&engine, context(), &steps).await;
  assert_eq!(first.status, PromotionPhase::Running);
  assert_eq!(first.retry_after, Some(Duration::from_secs(30)));
  assert_eq!(first.health_checks.len(), 1);

  let second = promote(&engine, resumed(&first), &steps).await;
  assert_eq!(second.status, PromotionPhase::Succeeded);
  assert!(second.retry_after.is_none());
  assert_eq!(second.health_checks, first.health_checks);
  assert_eq!(second.health_checks[0].kind, "platform-app");
}

#[tokio::test]
async fn test_credentials_injected_when_declared() {
  let mut db = InMemoryCredentialsDatabase::new();
  db.insert(
    "demo",
    CredentialType::Git,
    "https://github.com/example/app.git",
    Credentials {
      username: "git-bot".to_string(),
      password: "secret".to_string(),
      ssh_private_key: None,
    },
  )
  .unwrap();

  let mut registry = StepRunnerRegistry::new();
  registry
    .register(
      "git-credentials",
      StepRunnerMetadata::new().with_capability(StepRunnerCapability::AccessCredentials),
      |caps| {
        Box::new(CredentialsRunner {
          credentials: caps.credentials,
        })
      },
    )
    .unwrap();
  registry
    .register("git-credentials-undeclared", StepRunnerMetadata::new(), |caps| {
      Box::new(CredentialsRunner {
        credentials: caps.credentials,
      })
    })
    .unwrap();
  let engine = Engine::new(
    EngineConfig::default(),
    Arc::new(registry),
    ExecutorConfig {
      credentials: Some(Arc::new(db)),
      ..Default::default()
    },
  );

  let mut declared = step("git-credentials", "creds");
  declared.config = Some(json!({ "repoURL": "https://github.com/example/app" }));
  let mut undeclared = with_if(step("git-credentials-undeclared", "undeclared"), "always()");
  undeclared.config = declared.config.clone();

  let result = promote(&engine, context(), &[declared, undeclared]).await;

  assert_eq!(result.state.get("creds"), Some(&json!({ "username": "git-bot" })));
  assert_eq!(status_of(&result, "undeclared"), StepPhase::Errored);
  assert_eq!(result.status, PromotionPhase::Errored);
}
