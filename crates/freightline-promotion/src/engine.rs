//! Promotion entry point.

use std::path::PathBuf;
use std::sync::Arc;

use freightline_config::Step;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument};

use crate::context::Context;
use crate::error::PromotionError;
use crate::executor::ExecutorConfig;
use crate::orchestrator::{Orchestrator, snapshot};
use crate::registry::StepRunnerRegistry;
use crate::result::{PromotionPhase, PromotionResult};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
  /// Where scoped working directories are created. Defaults to the system
  /// temp directory.
  pub work_dir_root: Option<PathBuf>,
}

/// Runs promotions.
#[derive(Debug, Clone)]
pub struct Engine {
  config: EngineConfig,
  orchestrator: Orchestrator,
}

impl Engine {
  pub fn new(
    config: EngineConfig,
    registry: Arc<StepRunnerRegistry>,
    executor_config: ExecutorConfig,
  ) -> Self {
    Self {
      config,
      orchestrator: Orchestrator::new(registry, executor_config),
    }
  }

  /// Run one pass of a promotion.
  ///
  /// Without a working directory on the context, a fresh one is created for
  /// this call and removed before returning.
  #[instrument(
    name = "promote",
    skip(self, ctx, steps, cancel),
    fields(promotion = %ctx.promotion, stage = %ctx.stage)
  )]
  pub async fn promote(
    &self,
    mut ctx: Context,
    steps: &[Step],
    cancel: &CancellationToken,
  ) -> PromotionResult {
    let _scoped_dir = if ctx.work_dir.is_none() {
      let mut builder = tempfile::Builder::new();
      builder.prefix("promotion-");
      let created = match &self.config.work_dir_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
      };

      match created {
        Ok(dir) => {
          ctx.work_dir = Some(dir.path().to_path_buf());
          Some(dir)
        }
        Err(source) => {
          let err = PromotionError::WorkDir { source };
          error!(error = %err, "promotion_errored");
          let mut result = snapshot(
            &ctx,
            PromotionPhase::Errored,
            err.to_string(),
            ctx.start_from_step,
          );
          result.error = Some(err);
          return result;
        }
      }
    } else {
      None
    };

    self.orchestrator.execute_steps(&mut ctx, steps, cancel).await
  }
}
