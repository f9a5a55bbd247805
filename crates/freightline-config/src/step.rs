use serde::{Deserialize, Serialize};

use crate::var::ExpressionVariable;

/// Separates a task namespace from the step name inside an alias,
/// e.g. `"update::commit"`.
pub const TASK_NAMESPACE_SEPARATOR: &str = "::";

/// One declarative unit of promotion work.
///
/// Steps are immutable once the pipeline is defined and always execute in
/// index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
  /// Selects the step runner.
  pub kind: String,
  /// Unique key within the pipeline; also the state key for the step's
  /// output. Defaults to `step-<index>` when empty.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub alias: String,
  /// Raw templated configuration.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub vars: Vec<ExpressionVariable>,
  /// Boolean expression deciding whether the step runs.
  #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
  pub if_expr: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<StepRetry>,
  #[serde(default)]
  pub continue_on_error: bool,
}

impl Step {
  /// Create a step of the given kind with the given alias.
  pub fn new(kind: impl Into<String>, alias: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      alias: alias.into(),
      ..Default::default()
    }
  }

  /// The effective alias of the step at `index`.
  pub fn alias_at(&self, index: usize) -> String {
    if self.alias.is_empty() {
      format!("step-{}", index)
    } else {
      self.alias.clone()
    }
  }

  /// The task namespace of an alias, if it has one.
  ///
  /// `"update::commit"` belongs to the `"update"` namespace.
  pub fn namespace_of(alias: &str) -> Option<&str> {
    alias
      .split_once(TASK_NAMESPACE_SEPARATOR)
      .map(|(namespace, _)| namespace)
      .filter(|namespace| !namespace.is_empty())
  }

  /// The alias with its task namespace removed.
  pub fn strip_namespace(alias: &str) -> &str {
    alias
      .split_once(TASK_NAMESPACE_SEPARATOR)
      .map_or(alias, |(_, name)| name)
  }

  /// The configured error threshold, ignoring an explicit zero.
  pub fn error_threshold(&self) -> Option<u32> {
    self
      .retry
      .as_ref()
      .and_then(|r| r.error_threshold)
      .filter(|t| *t > 0)
  }

  /// The configured timeout in milliseconds, ignoring an explicit zero.
  pub fn timeout_ms(&self) -> Option<u64> {
    self
      .retry
      .as_ref()
      .and_then(|r| r.timeout_ms)
      .filter(|t| *t > 0)
  }
}

/// Retry budget overrides for a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRetry {
  /// Consecutive recoverable errors after which the step is errored.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_threshold: Option<u32>,
  /// Time allowed since the step first started.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

/// Health check criteria returned by a successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckStep {
  pub kind: String,
  #[serde(default)]
  pub config: serde_json::Value,
}
