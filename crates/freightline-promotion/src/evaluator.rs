//! Resolves a step's variables, condition and configuration against the
//! promotion context.
//!
//! The expression environment is rebuilt on every call from the current
//! context, so evaluation never observes stale state. Its layers are:
//!
//! - `ctx`: promotion identity and the target Freight
//! - `vars`: context variables, then step variables in declaration order
//! - `outputs`: the shared state, keyed by step alias
//! - `task.outputs`: outputs of steps in the current step's task namespace
//! - `stepMetas`: execution metadata keyed by alias

use freightline_config::Step;
use minijinja::{Environment, Value as JinjaValue};
use serde_json::{Map, Value, json};

use crate::cache::LookupCache;
use crate::context::{Context, StepContext};
use crate::error::EvaluationError;
use crate::expr::{evaluate_condition, evaluate_json, evaluate_template, json_kind};
use crate::functions::{FunctionScope, register_functions};

#[derive(Debug, Clone, Copy, Default)]
pub struct StepEvaluator;

impl StepEvaluator {
  pub fn new() -> Self {
    Self
  }

  /// Evaluate context variables, then step variables.
  ///
  /// Context variables cannot see step outputs. Step variables see outputs,
  /// task outputs and every variable resolved before them.
  pub fn vars(
    &self,
    ctx: &Context,
    step: &Step,
    alias: &str,
    cache: &LookupCache,
  ) -> Result<Map<String, Value>, EvaluationError> {
    let env = environment(ctx, alias, cache);
    let ctx_layer = ctx_layer(ctx);
    let mut vars = Map::new();

    for var in &ctx.vars {
      let scope = JinjaValue::from_serialize(json!({
        "ctx": ctx_layer,
        "vars": vars,
      }));
      let value = evaluate_template(&env, &var.value, &scope).map_err(|e| {
        EvaluationError::Variable {
          name: var.name.clone(),
          source: Box::new(e),
        }
      })?;
      vars.insert(var.name.clone(), value);
    }

    let mut layers = output_layers(ctx, alias)?;
    layers.insert("ctx".to_string(), ctx_layer);
    for var in &step.vars {
      layers.insert("vars".to_string(), Value::Object(vars.clone()));
      let scope = JinjaValue::from_serialize(&layers);
      let value = evaluate_template(&env, &var.value, &scope).map_err(|e| {
        EvaluationError::Variable {
          name: var.name.clone(),
          source: Box::new(e),
        }
      })?;
      vars.insert(var.name.clone(), value);
    }

    Ok(vars)
  }

  /// Whether the step should be skipped.
  ///
  /// Without a condition the step is skipped once any other step has failed
  /// outside of `continue_on_error`. Otherwise it is skipped exactly when the
  /// condition evaluates to `false`.
  pub fn should_skip(
    &self,
    ctx: &Context,
    step: &Step,
    alias: &str,
    cache: &LookupCache,
  ) -> Result<bool, EvaluationError> {
    let condition = step.if_expr.as_deref().map(str::trim).unwrap_or_default();
    if condition.is_empty() {
      return Ok(ctx.step_execution_metadata.has_failures_excluding(alias));
    }

    let vars = self.vars(ctx, step, alias, cache)?;
    let env = environment(ctx, alias, cache);
    let scope = full_scope(ctx, alias, vars)?;
    Ok(!evaluate_condition(&env, condition, &scope)?)
  }

  /// Evaluate the step's configuration.
  ///
  /// Returns `None` when the step has no configuration. Anything other than
  /// an object after evaluation is an error.
  pub fn config(
    &self,
    ctx: &Context,
    step: &Step,
    alias: &str,
    cache: &LookupCache,
  ) -> Result<Option<Map<String, Value>>, EvaluationError> {
    let raw = match &step.config {
      None | Some(Value::Null) => return Ok(None),
      Some(raw) => raw,
    };

    let vars = self.vars(ctx, step, alias, cache)?;
    let env = environment(ctx, alias, cache);
    let scope = full_scope(ctx, alias, vars)?;
    match evaluate_json(&env, raw, &scope)? {
      Value::Object(config) => Ok(Some(config)),
      other => Err(EvaluationError::InvalidConfig {
        kind: json_kind(&other).to_string(),
      }),
    }
  }

  /// Assemble the context handed to the step's runner.
  ///
  /// State and Freight are copied so the runner cannot touch the live
  /// context.
  pub fn build_step_context(
    &self,
    ctx: &Context,
    step: &Step,
    alias: &str,
    cache: &LookupCache,
  ) -> Result<StepContext, EvaluationError> {
    let work_dir = ctx
      .work_dir
      .clone()
      .ok_or(EvaluationError::MissingWorkDir)?;
    let config = self.config(ctx, step, alias, cache)?;

    Ok(StepContext {
      alias: alias.to_string(),
      project: ctx.project.clone(),
      stage: ctx.stage.clone(),
      promotion: ctx.promotion.clone(),
      actor: ctx.actor.clone(),
      work_dir,
      shared_state: ctx.state.clone(),
      config,
      target_freight_ref: ctx.target_freight_ref.clone(),
      freight_requests: ctx.freight_requests.clone(),
      freight: ctx.freight.clone(),
    })
  }
}

fn environment<'source>(ctx: &Context, alias: &str, cache: &LookupCache) -> Environment<'source> {
  let mut env = Environment::new();
  register_functions(
    &mut env,
    FunctionScope {
      freight: ctx.freight.clone(),
      metadata: ctx.step_execution_metadata.clone(),
      current_alias: alias.to_string(),
      cache: cache.clone(),
    },
  );
  env
}

fn ctx_layer(ctx: &Context) -> Value {
  json!({
    "project": ctx.project,
    "stage": ctx.stage,
    "promotion": ctx.promotion,
    "actor": ctx.actor,
    "targetFreight": {
      "name": ctx.target_freight_ref.name,
      "origin": ctx.target_freight_ref.origin,
    },
  })
}

fn output_layers(ctx: &Context, alias: &str) -> Result<Map<String, Value>, EvaluationError> {
  let task_outputs = Step::namespace_of(alias)
    .map(|namespace| ctx.state.task_outputs(namespace))
    .unwrap_or_default();

  let mut step_metas = Map::new();
  for metadata in ctx.step_execution_metadata.iter() {
    let value = serde_json::to_value(metadata)
      .map_err(|source| EvaluationError::Conversion { source })?;
    step_metas.insert(metadata.alias.clone(), value);
  }

  let mut layers = Map::new();
  layers.insert("outputs".to_string(), Value::Object(ctx.state.as_map().clone()));
  layers.insert("task".to_string(), json!({ "outputs": task_outputs }));
  layers.insert("stepMetas".to_string(), Value::Object(step_metas));
  Ok(layers)
}

fn full_scope(
  ctx: &Context,
  alias: &str,
  vars: Map<String, Value>,
) -> Result<JinjaValue, EvaluationError> {
  let mut layers = output_layers(ctx, alias)?;
  layers.insert("ctx".to_string(), ctx_layer(ctx));
  layers.insert("vars".to_string(), Value::Object(vars));
  Ok(JinjaValue::from_serialize(&layers))
}
