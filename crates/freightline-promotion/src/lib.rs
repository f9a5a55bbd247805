//! Promotion step engine for freightline.
//!
//! Moves Freight into a Stage by running an ordered pipeline of steps. Each
//! call runs one pass and can be resumed from the returned checkpoint.
//!
//! # Architecture
//!
//! ```text
//! Engine
//! └── promote(ctx, steps, cancel) - scoped work dir, delegates to the orchestrator
//!
//! Orchestrator
//! └── execute_steps - skip evaluation, retries, timeouts, phase reduction
//!
//! StepEvaluator
//! └── vars / should_skip / config / build_step_context - ${{ }} expressions
//!
//! StepExecutor
//! └── execute - capability injection and the panic boundary
//!
//! StepRunnerRegistry
//! └── kind -> (factory, metadata)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use freightline_promotion::{Context, Engine, EngineConfig, ExecutorConfig};
//!
//! let engine = Engine::new(
//!   EngineConfig::default(),
//!   Arc::new(registry),
//!   ExecutorConfig::default(),
//! );
//! let result = engine.promote(ctx, &steps, &cancel).await;
//! store.save(&result.checkpoint())?;
//! ```

mod cache;
mod context;
mod engine;
mod error;
mod evaluator;
mod executor;
mod expr;
mod functions;
mod metadata;
mod orchestrator;
mod registry;
mod result;
mod runner;
mod state;

pub use cache::LookupCache;
pub use context::{Context, StepContext};
pub use engine::{Engine, EngineConfig};
pub use error::{
  BoxError, EvaluationError, ExecutionError, FailedError, PromotionError, RegistryError,
  TerminalError, is_failed, is_terminal,
};
pub use evaluator::StepEvaluator;
pub use executor::{ExecutorConfig, StepExecutor};
pub use metadata::{StepExecutionMetadataList, StepMetadata, StepPhase};
pub use orchestrator::{Orchestrator, determine_final_phase};
pub use registry::{
  StepRunnerFactory, StepRunnerMetadata, StepRunnerRegistration, StepRunnerRegistry,
};
pub use result::{Checkpoint, PromotionPhase, PromotionResult, StepResult};
pub use runner::{
  ControlPlaneClient, PlatformClient, StepRunner, StepRunnerCapabilities, StepRunnerCapability,
};
pub use state::State;
