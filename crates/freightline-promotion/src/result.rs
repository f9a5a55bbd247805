//! Step and promotion result types.

use std::fmt;
use std::time::Duration;

use freightline_config::HealthCheckStep;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PromotionError;
use crate::metadata::{StepExecutionMetadataList, StepPhase};
use crate::state::State;

/// Result of a single step runner invocation.
///
/// A result with `Pending` status is invalid and errors the step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
  pub status: StepPhase,
  pub message: String,
  /// Merged into the shared state under the step's alias.
  pub output: Map<String, Value>,
  /// Health check criteria to evaluate once the promotion completes.
  pub health_check: Option<HealthCheckStep>,
  /// Hint for the host on when to try again while the step is running.
  pub retry_after: Option<Duration>,
}

impl StepResult {
  pub fn new(status: StepPhase) -> Self {
    Self {
      status,
      ..Default::default()
    }
  }

  pub fn succeeded() -> Self {
    Self::new(StepPhase::Succeeded)
  }

  pub fn skipped() -> Self {
    Self::new(StepPhase::Skipped)
  }

  /// The step has not finished yet; the engine will run it again.
  pub fn running() -> Self {
    Self::new(StepPhase::Running)
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::new(StepPhase::Failed).with_message(message)
  }

  pub fn errored(message: impl Into<String>) -> Self {
    Self::new(StepPhase::Errored).with_message(message)
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = message.into();
    self
  }

  pub fn with_output(mut self, output: Map<String, Value>) -> Self {
    self.output = output;
    self
  }

  pub fn with_health_check(mut self, health_check: HealthCheckStep) -> Self {
    self.health_check = Some(health_check);
    self
  }

  pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
    self.retry_after = Some(retry_after);
    self
  }
}

/// The macro-level outcome of a promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromotionPhase {
  Running,
  Succeeded,
  Failed,
  Errored,
  Aborted,
}

impl PromotionPhase {
  pub fn is_terminal(self) -> bool {
    self != PromotionPhase::Running
  }

  pub(crate) fn from_step(status: StepPhase) -> Self {
    match status {
      StepPhase::Aborted => PromotionPhase::Aborted,
      StepPhase::Failed => PromotionPhase::Failed,
      StepPhase::Errored => PromotionPhase::Errored,
      _ => PromotionPhase::Succeeded,
    }
  }
}

impl fmt::Display for PromotionPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PromotionPhase::Running => "Running",
      PromotionPhase::Succeeded => "Succeeded",
      PromotionPhase::Failed => "Failed",
      PromotionPhase::Errored => "Errored",
      PromotionPhase::Aborted => "Aborted",
    };
    write!(f, "{}", s)
  }
}

/// Result of one engine invocation.
///
/// `status` is `Running` exactly when the loop stopped before reducing a
/// final phase. `error` is set when the host should back off and retry or
/// when the invocation was stopped by a mechanical condition.
#[derive(Debug)]
pub struct PromotionResult {
  pub status: PromotionPhase,
  pub message: String,
  pub current_step: usize,
  pub step_execution_metadata: StepExecutionMetadataList,
  pub state: State,
  pub health_checks: Vec<HealthCheckStep>,
  pub retry_after: Option<Duration>,
  pub error: Option<PromotionError>,
}

impl PromotionResult {
  /// The data a host persists to resume this promotion later.
  pub fn checkpoint(&self) -> Checkpoint {
    Checkpoint {
      current_step: self.current_step,
      step_execution_metadata: self.step_execution_metadata.clone(),
      state: self.state.clone(),
      health_checks: self.health_checks.clone(),
    }
  }
}

/// Resumable progress of a promotion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
  #[serde(default)]
  pub current_step: usize,
  #[serde(default)]
  pub step_execution_metadata: StepExecutionMetadataList,
  #[serde(default)]
  pub state: State,
  #[serde(default)]
  pub health_checks: Vec<HealthCheckStep>,
}
