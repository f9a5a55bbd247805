//! Name-keyed registry of step runners.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RegistryError;
use crate::runner::{StepRunner, StepRunnerCapabilities, StepRunnerCapability};

/// Builds a runner from the capabilities it declared.
pub type StepRunnerFactory =
  Arc<dyn Fn(StepRunnerCapabilities) -> Box<dyn StepRunner> + Send + Sync>;

/// Defaults and requirements of a runner kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepRunnerMetadata {
  /// Applies when a step sets no timeout of its own.
  pub default_timeout: Option<Duration>,
  /// Applies when a step sets no threshold of its own. Zero is raised to
  /// one at registration, so errors are not retried unless overridden.
  pub default_error_threshold: u32,
  pub required_capabilities: Vec<StepRunnerCapability>,
}

impl StepRunnerMetadata {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
    self.default_timeout = Some(timeout);
    self
  }

  pub fn with_default_error_threshold(mut self, threshold: u32) -> Self {
    self.default_error_threshold = threshold;
    self
  }

  pub fn with_capability(mut self, capability: StepRunnerCapability) -> Self {
    if !self.required_capabilities.contains(&capability) {
      self.required_capabilities.push(capability);
    }
    self
  }

  pub fn requires(&self, capability: StepRunnerCapability) -> bool {
    self.required_capabilities.contains(&capability)
  }
}

/// A registered runner kind.
#[derive(Clone)]
pub struct StepRunnerRegistration {
  pub name: String,
  pub metadata: StepRunnerMetadata,
  pub factory: StepRunnerFactory,
}

impl fmt::Debug for StepRunnerRegistration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepRunnerRegistration")
      .field("name", &self.name)
      .field("metadata", &self.metadata)
      .finish_non_exhaustive()
  }
}

/// Maps step kinds to runner registrations.
#[derive(Debug, Clone, Default)]
pub struct StepRunnerRegistry {
  registrations: HashMap<String, StepRunnerRegistration>,
}

impl StepRunnerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a runner kind. Fails if the kind is already registered.
  pub fn register<F>(
    &mut self,
    name: impl Into<String>,
    metadata: StepRunnerMetadata,
    factory: F,
  ) -> Result<(), RegistryError>
  where
    F: Fn(StepRunnerCapabilities) -> Box<dyn StepRunner> + Send + Sync + 'static,
  {
    let name = name.into();
    if self.registrations.contains_key(&name) {
      return Err(RegistryError::AlreadyRegistered { kind: name });
    }
    self.replace(name, metadata, factory);
    Ok(())
  }

  /// Register a runner kind, overwriting any existing registration.
  ///
  /// Returns the registration that was replaced.
  pub fn replace<F>(
    &mut self,
    name: impl Into<String>,
    mut metadata: StepRunnerMetadata,
    factory: F,
  ) -> Option<StepRunnerRegistration>
  where
    F: Fn(StepRunnerCapabilities) -> Box<dyn StepRunner> + Send + Sync + 'static,
  {
    let name = name.into();
    if metadata.default_error_threshold == 0 {
      metadata.default_error_threshold = 1;
    }
    self.registrations.insert(
      name.clone(),
      StepRunnerRegistration {
        name,
        metadata,
        factory: Arc::new(factory),
      },
    )
  }

  /// Look up the registration for a step kind.
  pub fn get(&self, kind: &str) -> Result<&StepRunnerRegistration, RegistryError> {
    self
      .registrations
      .get(kind)
      .ok_or_else(|| RegistryError::NotFound {
        kind: kind.to_string(),
      })
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.registrations.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.registrations.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  pub fn len(&self) -> usize {
    self.registrations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.registrations.is_empty()
  }
}
