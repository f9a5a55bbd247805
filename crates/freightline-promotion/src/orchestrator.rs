//! The step loop.
//!
//! One pass walks the steps in index order from `start_from_step`, running
//! at most one step at a time. The pass stops early when a step needs
//! another attempt (`Running`) or the promotion is cancelled. Otherwise the
//! step statuses are reduced into the final phase.
//!
//! Progress lives entirely in the context's metadata and state, so a host
//! can resume a promotion from any checkpoint.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use freightline_config::Step;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::LookupCache;
use crate::context::Context;
use crate::error::PromotionError;
use crate::evaluator::StepEvaluator;
use crate::executor::{ExecutorConfig, StepExecutor};
use crate::metadata::{StepMetadata, StepPhase};
use crate::registry::StepRunnerRegistry;
use crate::result::{PromotionPhase, PromotionResult};
use crate::runner::StepRunnerCapability;

/// Drives the steps of a promotion.
#[derive(Debug, Clone)]
pub struct Orchestrator {
  registry: Arc<StepRunnerRegistry>,
  evaluator: StepEvaluator,
  executor: StepExecutor,
}

impl Orchestrator {
  pub fn new(registry: Arc<StepRunnerRegistry>, config: ExecutorConfig) -> Self {
    Self {
      executor: StepExecutor::new(registry.clone(), config),
      evaluator: StepEvaluator::new(),
      registry,
    }
  }

  /// Run one pass over `steps`, mutating the context's state and metadata
  /// in place.
  #[instrument(
    name = "promotion_execute",
    skip(self, ctx, steps, cancel),
    fields(
      promotion = %ctx.promotion,
      stage = %ctx.stage,
      execution_id = %Uuid::new_v4(),
    )
  )]
  pub async fn execute_steps(
    &self,
    ctx: &mut Context,
    steps: &[Step],
    cancel: &CancellationToken,
  ) -> PromotionResult {
    info!(
      steps = steps.len(),
      start_from_step = ctx.start_from_step,
      "promotion_started"
    );

    let aliases: Vec<String> = steps
      .iter()
      .enumerate()
      .map(|(i, step)| step.alias_at(i))
      .collect();
    if let Some(alias) = first_duplicate(&aliases) {
      let err = PromotionError::DuplicateAlias {
        alias: alias.to_string(),
      };
      error!(error = %err, "promotion_errored");
      let mut result = snapshot(ctx, PromotionPhase::Errored, err.to_string(), ctx.start_from_step);
      result.error = Some(err);
      return result;
    }

    for (i, step) in steps.iter().enumerate().skip(ctx.start_from_step) {
      let alias = aliases[i].as_str();

      if cancel.is_cancelled() {
        let err = PromotionError::Cancelled;
        if let Some(meta) = ctx.step_execution_metadata.get_mut(alias)
          && meta.is_in_progress()
        {
          meta.with_error(&err).finished();
        }
        warn!(alias, "promotion_cancelled");
        let mut result = snapshot(ctx, PromotionPhase::Errored, err.to_string(), i);
        result.error = Some(err);
        return result;
      }

      let m = ctx.step_execution_metadata.ensure(alias, step.continue_on_error);
      if ctx.step_execution_metadata[m].is_finished() {
        continue;
      }

      let cache = LookupCache::new();

      if !ctx.step_execution_metadata[m].is_started() {
        match self.evaluator.should_skip(ctx, step, alias, &cache) {
          Ok(false) => {}
          Ok(true) => {
            info!(alias, "step_skipped");
            ctx.step_execution_metadata[m]
              .with_status(StepPhase::Skipped)
              .finished();
            continue;
          }
          Err(e) => {
            let err = PromotionError::from(e);
            error!(alias, error = %err, "step_errored");
            ctx.step_execution_metadata[m].with_error(&err).finished();
            continue;
          }
        }
      }

      let registration = match self.registry.get(&step.kind) {
        Ok(registration) => registration,
        Err(e) => {
          let err = PromotionError::from(e);
          error!(alias, error = %err, "step_errored");
          ctx.step_execution_metadata[m].with_error(&err).finished();
          continue;
        }
      };
      let threshold = step
        .error_threshold()
        .unwrap_or(registration.metadata.default_error_threshold)
        .max(1);
      let timeout = step
        .timeout_ms()
        .map(Duration::from_millis)
        .or(registration.metadata.default_timeout);
      let propagate = registration
        .metadata
        .requires(StepRunnerCapability::TaskOutputPropagation);

      ctx.step_execution_metadata[m].started();

      let step_ctx = match self.evaluator.build_step_context(ctx, step, alias, &cache) {
        Ok(step_ctx) => step_ctx,
        Err(e) => {
          let err = PromotionError::from(e);
          error!(alias, error = %err, "step_errored");
          ctx.step_execution_metadata[m].with_error(&err).finished();
          continue;
        }
      };

      let outcome = self.executor.execute(&step_ctx, step, alias, cancel).await;

      let mut retry_after = None;
      let step_error = match outcome {
        Ok(result) => {
          if !result.output.is_empty() {
            ctx.state.merge_output(alias, &result.output);
            if propagate {
              ctx.state.merge_task_output(alias, &result.output);
            }
          }

          if matches!(result.status, StepPhase::Pending) {
            let err = PromotionError::InvalidStatus {
              alias: alias.to_string(),
              status: result.status,
            };
            error!(alias, error = %err, "step_errored");
            ctx.step_execution_metadata[m].with_error(&err).finished();
            continue;
          }

          ctx.step_execution_metadata[m]
            .with_status(result.status)
            .with_message(result.message.clone());
          retry_after = result.retry_after;

          if result.status == StepPhase::Succeeded
            && let Some(health_check) = result.health_check
          {
            ctx.health_checks.push(health_check);
          }

          (result.status == StepPhase::Errored).then(|| PromotionError::StepErrored {
            alias: alias.to_string(),
            message: result.message,
          })
        }
        Err(e) => {
          ctx.step_execution_metadata[m]
            .with_status(e.status())
            .with_message(e.to_string());
          Some(PromotionError::from(e))
        }
      };

      let meta = &mut ctx.step_execution_metadata[m];
      match (&step_error, meta.status) {
        (_, StepPhase::Succeeded | StepPhase::Skipped) => {
          info!(alias, status = %meta.status, "step_completed");
          meta.finished();
          continue;
        }
        (Some(err), _) if err.is_terminal() => {
          error!(alias, status = %meta.status, error = %err, "step_errored");
          meta.finished();
          continue;
        }
        (Some(err), _) => {
          let error_count = meta.record_error();
          if error_count >= threshold {
            error!(alias, error_count, threshold, error = %err, "step_errored");
            meta.finished();
            continue;
          }
        }
        (None, StepPhase::Failed | StepPhase::Aborted) => {
          info!(alias, status = %meta.status, "step_completed");
          meta.finished();
          continue;
        }
        (None, _) => {}
      }

      if let Some(timeout) = timeout
        && timed_out(meta, timeout)
      {
        let err = PromotionError::Timeout {
          alias: alias.to_string(),
          timeout,
        };
        error!(alias, error = %err, "step_errored");
        meta.with_error(&err).finished();
        continue;
      }

      info!(
        alias,
        error_count = meta.error_count,
        error = step_error.as_ref().map(tracing::field::display),
        "step_running"
      );
      let message = meta.message.clone();
      let mut result = snapshot(ctx, PromotionPhase::Running, message, i);
      result.retry_after = retry_after;
      result.error = step_error;
      return result;
    }

    let (status, message) = determine_final_phase(&ctx.step_execution_metadata);
    info!(status = %status, message = %message, "promotion_completed");

    snapshot(ctx, status, message, steps.len().saturating_sub(1))
  }
}

/// Reduce step statuses into a promotion phase and message.
///
/// The worst status wins under `Succeeded/Skipped < Aborted < Failed <
/// Errored`, ignoring steps that continue on error. Among equally bad steps
/// the first one is reported.
pub fn determine_final_phase(metadata: &[StepMetadata]) -> (PromotionPhase, String) {
  let mut worst: Option<&StepMetadata> = None;
  for meta in metadata.iter().filter(|m| !m.continue_on_error) {
    if meta.status.severity() > worst.map_or(0, |w| w.status.severity()) {
      worst = Some(meta);
    }
  }

  match worst {
    None => (
      PromotionPhase::Succeeded,
      "all steps completed successfully".to_string(),
    ),
    Some(meta) => {
      let message = if meta.message.is_empty() {
        format!("step '{}' finished with status {}", meta.alias, meta.status)
      } else {
        meta.message.clone()
      };
      (PromotionPhase::from_step(meta.status), message)
    }
  }
}

pub(crate) fn snapshot(
  ctx: &Context,
  status: PromotionPhase,
  message: String,
  current_step: usize,
) -> PromotionResult {
  PromotionResult {
    status,
    message,
    current_step,
    step_execution_metadata: ctx.step_execution_metadata.clone(),
    state: ctx.state.clone(),
    health_checks: ctx.health_checks.clone(),
    retry_after: None,
    error: None,
  }
}

fn first_duplicate(aliases: &[String]) -> Option<&str> {
  let mut seen = HashSet::new();
  aliases
    .iter()
    .find(|alias| !seen.insert(alias.as_str()))
    .map(String::as_str)
}

fn timed_out(meta: &StepMetadata, timeout: Duration) -> bool {
  meta.started_at.is_some_and(|started_at| {
    Utc::now()
      .signed_duration_since(started_at)
      .to_std()
      .is_ok_and(|elapsed| elapsed >= timeout)
  })
}
