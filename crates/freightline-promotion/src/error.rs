//! Error types.
//!
//! Step runners report failures as boxed errors. Two marker types classify
//! them: [`TerminalError`] (never retried, step errors) and [`FailedError`]
//! (a business failure, never retried, step fails). Classification walks the
//! `source()` chain, so a marker wrapped by other errors is still honored.

use std::error::Error as StdError;

use crate::metadata::StepPhase;

/// Boxed error returned by step runners.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An error that must never trigger a retry.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TerminalError {
  #[source]
  source: BoxError,
}

impl TerminalError {
  pub fn new(source: impl Into<BoxError>) -> Self {
    Self {
      source: source.into(),
    }
  }
}

/// A step's intentional business failure. Never retried.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FailedError {
  pub message: String,
}

impl FailedError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Whether any error in the chain is terminal.
pub fn is_terminal(err: &(dyn StdError + 'static)) -> bool {
  chain_contains(err, |e| e.is::<TerminalError>() || e.is::<FailedError>())
}

/// Whether any error in the chain reports a business failure.
pub fn is_failed(err: &(dyn StdError + 'static)) -> bool {
  chain_contains(err, |e| e.is::<FailedError>())
}

fn chain_contains(
  err: &(dyn StdError + 'static),
  predicate: impl Fn(&(dyn StdError + 'static)) -> bool,
) -> bool {
  let mut current = Some(err);
  while let Some(e) = current {
    if predicate(e) {
      return true;
    }
    current = e.source();
  }
  false
}

/// Errors produced while evaluating expressions, conditions and
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
  /// An expression failed to compile or evaluate.
  #[error("failed to evaluate expression '{expression}': {source}")]
  Expression {
    expression: String,
    #[source]
    source: minijinja::Error,
  },

  /// A `${{` without its closing `}}`.
  #[error("unterminated expression in '{template}'")]
  Unterminated { template: String },

  /// An `if` condition produced something other than a boolean.
  #[error("condition '{expression}' must evaluate to a boolean, got {kind}")]
  NonBoolean { expression: String, kind: String },

  /// A variable failed to evaluate.
  #[error("failed to evaluate variable '{name}': {source}")]
  Variable {
    name: String,
    #[source]
    source: Box<EvaluationError>,
  },

  /// Step configuration did not evaluate to an object.
  #[error("step configuration must evaluate to an object, got {kind}")]
  InvalidConfig { kind: String },

  /// An expression result could not be converted to JSON.
  #[error("failed to convert expression result: {source}")]
  Conversion {
    #[source]
    source: serde_json::Error,
  },

  /// The promotion context has no working directory.
  #[error("promotion has no working directory")]
  MissingWorkDir,
}

/// Step runner registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("no step runner registered for kind '{kind}'")]
  NotFound { kind: String },

  #[error("a step runner is already registered for kind '{kind}'")]
  AlreadyRegistered { kind: String },
}

/// Errors produced while executing a single step.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// The runner panicked. Always terminal.
  #[error("step '{alias}' panicked: {source}")]
  Panicked {
    alias: String,
    #[source]
    source: TerminalError,
  },

  /// The runner returned an error.
  #[error("step '{alias}' ({kind}) {}: {source}", outcome(.source))]
  Step {
    alias: String,
    kind: String,
    #[source]
    source: BoxError,
  },
}

impl ExecutionError {
  pub fn is_terminal(&self) -> bool {
    match self {
      ExecutionError::Registry(_) | ExecutionError::Panicked { .. } => true,
      ExecutionError::Step { source, .. } => is_terminal(&**source),
    }
  }

  /// The step status this error implies.
  pub fn status(&self) -> StepPhase {
    match self {
      ExecutionError::Step { source, .. } if is_failed(&**source) => StepPhase::Failed,
      _ => StepPhase::Errored,
    }
  }
}

fn outcome(source: &BoxError) -> &'static str {
  if is_failed(&**source) {
    "failed"
  } else {
    "errored"
  }
}

/// Errors surfaced alongside a promotion result.
#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
  /// The cancellation token fired.
  #[error("promotion cancelled")]
  Cancelled,

  /// Two steps resolve to the same alias.
  #[error("duplicate step alias '{alias}'")]
  DuplicateAlias { alias: String },

  /// The scoped working directory could not be created.
  #[error("failed to create working directory: {source}")]
  WorkDir {
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Evaluation(#[from] EvaluationError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Execution(#[from] ExecutionError),

  /// A runner returned a status that cannot describe an attempt.
  #[error("step '{alias}' returned invalid status {status}")]
  InvalidStatus { alias: String, status: StepPhase },

  /// The step kept running past its timeout.
  #[error("step '{alias}' timed out after {timeout:?}")]
  Timeout {
    alias: String,
    timeout: std::time::Duration,
  },

  /// A runner reported `Errored` without an error; synthesized from its
  /// message.
  #[error("step '{alias}' errored: {message}")]
  StepErrored { alias: String, message: String },
}

impl PromotionError {
  pub fn is_terminal(&self) -> bool {
    match self {
      PromotionError::Execution(e) => e.is_terminal(),
      PromotionError::StepErrored { .. } => false,
      _ => true,
    }
  }
}
