//! The step runner plugin contract and its injectable capabilities.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use freightline_credentials::CredentialsDatabase;
use tokio_util::sync::CancellationToken;

use crate::context::StepContext;
use crate::error::BoxError;
use crate::result::StepResult;

/// Executes one kind of step.
///
/// Runners observe `cancel` themselves; the orchestrator never preempts a
/// running step.
#[async_trait]
pub trait StepRunner: Send + Sync {
  /// The step kind this runner implements.
  fn name(&self) -> &str;

  /// Run one attempt of the step.
  ///
  /// Errors are retried until the step's error threshold or timeout is
  /// reached unless they carry a [`TerminalError`](crate::TerminalError) or
  /// [`FailedError`](crate::FailedError).
  async fn run(&self, ctx: &StepContext, cancel: CancellationToken) -> Result<StepResult, BoxError>;
}

/// Read access to the control plane's resources.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
  async fn get_resource(
    &self,
    namespace: &str,
    kind: &str,
    name: &str,
  ) -> Result<Option<serde_json::Value>, BoxError>;
}

/// Access to the external deployment platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
  async fn get_application(
    &self,
    namespace: &str,
    name: &str,
  ) -> Result<Option<serde_json::Value>, BoxError>;
}

/// A dependency a step runner declares it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepRunnerCapability {
  AccessControlPlane,
  AccessPlatform,
  AccessCredentials,
  /// Outputs of namespaced steps are also merged under the task namespace.
  TaskOutputPropagation,
}

/// Handles injected into a runner at construction.
///
/// Only the handles for declared capabilities are populated.
#[derive(Clone, Default)]
pub struct StepRunnerCapabilities {
  pub control_plane: Option<Arc<dyn ControlPlaneClient>>,
  pub platform: Option<Arc<dyn PlatformClient>>,
  pub credentials: Option<Arc<dyn CredentialsDatabase>>,
}

impl fmt::Debug for StepRunnerCapabilities {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepRunnerCapabilities")
      .field("control_plane", &self.control_plane.is_some())
      .field("platform", &self.platform.is_some())
      .field("credentials", &self.credentials.is_some())
      .finish()
  }
}
