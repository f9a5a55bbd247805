//! `compose-output`: publishes its configuration as step output.
//!
//! Useful for naming values computed by expressions so later steps can read
//! them from `outputs.<alias>`.

use async_trait::async_trait;
use freightline_promotion::{BoxError, StepContext, StepResult, StepRunner};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const COMPOSE_OUTPUT: &str = "compose-output";

#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeOutput;

#[async_trait]
impl StepRunner for ComposeOutput {
  fn name(&self) -> &str {
    COMPOSE_OUTPUT
  }

  async fn run(
    &self,
    ctx: &StepContext,
    _cancel: CancellationToken,
  ) -> Result<StepResult, BoxError> {
    let output = ctx.config.clone().unwrap_or_default();
    debug!(alias = %ctx.alias, keys = output.len(), "output_composed");
    Ok(StepResult::succeeded().with_output(output))
  }
}
