//! Freightline Config
//!
//! This crate contains the serializable definitions consumed by the
//! promotion engine: the ordered step pipeline and the Freight a promotion
//! moves toward.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI)
//! - Checkpoint data persisted by a hosting control loop
//!
//! Field names use camelCase on the wire so that definitions and
//! checkpoints round-trip unchanged between the engine and its host.

mod freight;
mod step;
mod var;

pub use freight::{
  Chart, FreightCollection, FreightOrigin, FreightOriginKind, FreightReference, FreightRequest,
  FreightSources, GitCommit, Image,
};
pub use step::{HealthCheckStep, Step, StepRetry, TASK_NAMESPACE_SEPARATOR};
pub use var::ExpressionVariable;
