//! Per-step execution metadata.
//!
//! Metadata is created the first time an alias is seen, persisted by the
//! host between engine invocations, and never removed within a promotion.
//! `started_at` set with `finished_at` unset means the step is in progress
//! and eligible for another attempt.

use std::fmt;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepPhase {
  #[default]
  Pending,
  Running,
  Succeeded,
  Skipped,
  Failed,
  Errored,
  Aborted,
}

impl StepPhase {
  /// Whether this status counts as a failure for outcome predicates.
  pub fn is_failure(self) -> bool {
    matches!(
      self,
      StepPhase::Failed | StepPhase::Errored | StepPhase::Aborted
    )
  }

  /// Rank used when reducing step statuses into a promotion phase.
  pub(crate) fn severity(self) -> u8 {
    match self {
      StepPhase::Pending | StepPhase::Running | StepPhase::Succeeded | StepPhase::Skipped => 0,
      StepPhase::Aborted => 1,
      StepPhase::Failed => 2,
      StepPhase::Errored => 3,
    }
  }
}

impl fmt::Display for StepPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      StepPhase::Pending => "Pending",
      StepPhase::Running => "Running",
      StepPhase::Succeeded => "Succeeded",
      StepPhase::Skipped => "Skipped",
      StepPhase::Failed => "Failed",
      StepPhase::Errored => "Errored",
      StepPhase::Aborted => "Aborted",
    };
    write!(f, "{}", s)
  }
}

/// Execution bookkeeping for one step alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMetadata {
  pub alias: String,
  #[serde(default)]
  pub continue_on_error: bool,
  #[serde(default)]
  pub status: StepPhase,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub message: String,
  #[serde(default)]
  pub error_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl StepMetadata {
  pub fn new(alias: impl Into<String>) -> Self {
    Self {
      alias: alias.into(),
      continue_on_error: false,
      status: StepPhase::Pending,
      message: String::new(),
      error_count: 0,
      started_at: None,
      finished_at: None,
    }
  }

  pub fn is_started(&self) -> bool {
    self.started_at.is_some()
  }

  pub fn is_finished(&self) -> bool {
    self.finished_at.is_some()
  }

  pub fn is_in_progress(&self) -> bool {
    self.is_started() && !self.is_finished()
  }

  /// Mark the step as running. Only a first start records `started_at`
  /// and resets the error count.
  pub fn started(&mut self) -> &mut Self {
    if self.started_at.is_none() {
      self.started_at = Some(Utc::now());
      self.error_count = 0;
    }
    self.status = StepPhase::Running;
    self
  }

  pub fn finished(&mut self) -> &mut Self {
    if self.finished_at.is_none() {
      self.finished_at = Some(Utc::now());
    }
    self
  }

  pub fn with_status(&mut self, status: StepPhase) -> &mut Self {
    self.status = status;
    self
  }

  pub fn with_message(&mut self, message: impl Into<String>) -> &mut Self {
    self.message = message.into();
    self
  }

  /// Mark the step errored with the given error's message.
  pub fn with_error(&mut self, err: impl fmt::Display) -> &mut Self {
    self.status = StepPhase::Errored;
    self.message = err.to_string();
    self
  }

  /// Count one more recoverable error and return the new total.
  pub fn record_error(&mut self) -> u32 {
    self.error_count = self.error_count.saturating_add(1);
    self.error_count
  }
}

/// Ordered metadata, one entry per distinct alias seen so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepExecutionMetadataList(Vec<StepMetadata>);

impl StepExecutionMetadataList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn index_of(&self, alias: &str) -> Option<usize> {
    self.0.iter().position(|m| m.alias == alias)
  }

  pub fn get(&self, alias: &str) -> Option<&StepMetadata> {
    self.0.iter().find(|m| m.alias == alias)
  }

  pub fn get_mut(&mut self, alias: &str) -> Option<&mut StepMetadata> {
    self.0.iter_mut().find(|m| m.alias == alias)
  }

  /// Index of the metadata for `alias`, creating it if missing.
  ///
  /// `continue_on_error` always follows the step definition.
  pub fn ensure(&mut self, alias: &str, continue_on_error: bool) -> usize {
    let index = match self.index_of(alias) {
      Some(index) => index,
      None => {
        self.0.push(StepMetadata::new(alias));
        self.0.len() - 1
      }
    };
    self.0[index].continue_on_error = continue_on_error;
    index
  }

  /// Whether any step other than `alias` recorded a failure that is not
  /// shielded by `continue_on_error`.
  pub fn has_failures_excluding(&self, alias: &str) -> bool {
    self
      .0
      .iter()
      .any(|m| m.alias != alias && !m.continue_on_error && m.status.is_failure())
  }

  pub fn into_inner(self) -> Vec<StepMetadata> {
    self.0
  }
}

impl From<Vec<StepMetadata>> for StepExecutionMetadataList {
  fn from(entries: Vec<StepMetadata>) -> Self {
    Self(entries)
  }
}

impl Deref for StepExecutionMetadataList {
  type Target = [StepMetadata];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl DerefMut for StepExecutionMetadataList {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.0
  }
}
