//! Runs a single step attempt through its registered runner.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use freightline_config::Step;
use freightline_credentials::CredentialsDatabase;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::context::StepContext;
use crate::error::{ExecutionError, TerminalError};
use crate::registry::{StepRunnerMetadata, StepRunnerRegistry};
use crate::result::StepResult;
use crate::runner::{
  ControlPlaneClient, PlatformClient, StepRunnerCapabilities, StepRunnerCapability,
};

/// Handles the executor may hand to runners that ask for them.
#[derive(Clone, Default)]
pub struct ExecutorConfig {
  pub control_plane: Option<Arc<dyn ControlPlaneClient>>,
  pub platform: Option<Arc<dyn PlatformClient>>,
  pub credentials: Option<Arc<dyn CredentialsDatabase>>,
}

impl fmt::Debug for ExecutorConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutorConfig")
      .field("control_plane", &self.control_plane.is_some())
      .field("platform", &self.platform.is_some())
      .field("credentials", &self.credentials.is_some())
      .finish()
  }
}

/// Resolves runners and executes them behind a panic boundary.
#[derive(Debug, Clone)]
pub struct StepExecutor {
  registry: Arc<StepRunnerRegistry>,
  config: ExecutorConfig,
}

impl StepExecutor {
  pub fn new(registry: Arc<StepRunnerRegistry>, config: ExecutorConfig) -> Self {
    Self { registry, config }
  }

  pub fn registry(&self) -> &StepRunnerRegistry {
    &self.registry
  }

  /// Capabilities for a runner, populated only for what it declared.
  pub fn capabilities_for(&self, metadata: &StepRunnerMetadata) -> StepRunnerCapabilities {
    StepRunnerCapabilities {
      control_plane: self
        .config
        .control_plane
        .clone()
        .filter(|_| metadata.requires(StepRunnerCapability::AccessControlPlane)),
      platform: self
        .config
        .platform
        .clone()
        .filter(|_| metadata.requires(StepRunnerCapability::AccessPlatform)),
      credentials: self
        .config
        .credentials
        .clone()
        .filter(|_| metadata.requires(StepRunnerCapability::AccessCredentials)),
    }
  }

  /// Run one attempt of `step`.
  ///
  /// A panic in the runner factory or in the runner itself is returned as a
  /// terminal [`ExecutionError::Panicked`].
  #[instrument(
    name = "step_execute",
    skip(self, ctx, step, cancel),
    fields(kind = %step.kind)
  )]
  pub async fn execute(
    &self,
    ctx: &StepContext,
    step: &Step,
    alias: &str,
    cancel: &CancellationToken,
  ) -> Result<StepResult, ExecutionError> {
    let registration = self.registry.get(&step.kind)?;
    let capabilities = self.capabilities_for(&registration.metadata);
    debug!(capabilities = ?capabilities, "step_runner_created");

    let factory = registration.factory.clone();
    let runner = std::panic::catch_unwind(AssertUnwindSafe(|| factory(capabilities)))
      .map_err(|payload| panicked(alias, payload))?;

    let outcome = AssertUnwindSafe(runner.run(ctx, cancel.clone()))
      .catch_unwind()
      .await;

    match outcome {
      Ok(Ok(result)) => Ok(result),
      Ok(Err(source)) => Err(ExecutionError::Step {
        alias: alias.to_string(),
        kind: step.kind.clone(),
        source,
      }),
      Err(payload) => {
        let err = panicked(alias, payload);
        error!(error = %err, "step_panicked");
        Err(err)
      }
    }
  }
}

fn panicked(alias: &str, payload: Box<dyn Any + Send>) -> ExecutionError {
  let message = payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic payload".to_string());

  ExecutionError::Panicked {
    alias: alias.to_string(),
    source: TerminalError::new(format!("panic: {}", message)),
  }
}
