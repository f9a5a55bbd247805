//! Built-in step runners.

mod compose;

use freightline_promotion::{RegistryError, StepRunnerMetadata, StepRunnerRegistry};

pub use compose::{COMPOSE_OUTPUT, ComposeOutput};

/// Register all built-in runners into `registry`.
pub fn register_builtins(registry: &mut StepRunnerRegistry) -> Result<(), RegistryError> {
  registry.register(COMPOSE_OUTPUT, StepRunnerMetadata::new(), |_| {
    Box::new(ComposeOutput)
  })?;
  Ok(())
}

/// A registry holding every built-in runner.
pub fn builtin_registry() -> Result<StepRunnerRegistry, RegistryError> {
  let mut registry = StepRunnerRegistry::new();
  register_builtins(&mut registry)?;
  Ok(registry)
}
