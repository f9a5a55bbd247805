//! Promotion-wide and per-step execution contexts.

use std::path::PathBuf;

use freightline_config::{
  ExpressionVariable, FreightCollection, FreightReference, FreightRequest, HealthCheckStep,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::StepExecutionMetadataList;
use crate::result::Checkpoint;
use crate::state::State;

/// Everything one orchestration run knows about the promotion.
///
/// Owned by a single run and mutated in place as steps execute; the host
/// rehydrates it from a [`Checkpoint`] before each invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
  pub project: String,
  pub stage: String,
  pub promotion: String,
  #[serde(default)]
  pub actor: String,
  #[serde(default)]
  pub target_freight_ref: FreightReference,
  #[serde(default)]
  pub freight_requests: Vec<FreightRequest>,
  #[serde(default)]
  pub freight: FreightCollection,
  #[serde(default)]
  pub vars: Vec<ExpressionVariable>,
  #[serde(default)]
  pub state: State,
  #[serde(default)]
  pub step_execution_metadata: StepExecutionMetadataList,
  #[serde(default)]
  pub start_from_step: usize,
  /// Health checks gathered from succeeded steps across invocations.
  #[serde(default)]
  pub health_checks: Vec<HealthCheckStep>,
  #[serde(skip)]
  pub work_dir: Option<PathBuf>,
}

impl Context {
  pub fn new(
    project: impl Into<String>,
    stage: impl Into<String>,
    promotion: impl Into<String>,
  ) -> Self {
    Self {
      project: project.into(),
      stage: stage.into(),
      promotion: promotion.into(),
      ..Default::default()
    }
  }

  /// Restore progress persisted from an earlier invocation.
  pub fn resume(&mut self, checkpoint: Checkpoint) {
    self.start_from_step = checkpoint.current_step;
    self.step_execution_metadata = checkpoint.step_execution_metadata;
    self.state = checkpoint.state;
    self.health_checks = checkpoint.health_checks;
  }
}

/// The context handed to a step runner.
///
/// State and Freight are copies; a runner cannot modify the orchestrator's
/// live context. Only the returned output flows back.
#[derive(Debug, Clone)]
pub struct StepContext {
  pub alias: String,
  pub project: String,
  pub stage: String,
  pub promotion: String,
  pub actor: String,
  pub work_dir: PathBuf,
  pub shared_state: State,
  /// Evaluated configuration; `None` when the step has none.
  pub config: Option<Map<String, Value>>,
  pub target_freight_ref: FreightReference,
  pub freight_requests: Vec<FreightRequest>,
  pub freight: FreightCollection,
}

impl StepContext {
  /// Deserialize the evaluated configuration into a runner's config type.
  ///
  /// A step without configuration deserializes from an empty object.
  pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    let config = self.config.clone().unwrap_or_default();
    serde_json::from_value(Value::Object(config))
  }
}
