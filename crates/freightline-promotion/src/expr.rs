//! `${{ }}` templates over minijinja expressions.
//!
//! A string that is exactly one `${{ expr }}` evaluates to the expression's
//! typed value. Any other string is interpolated, with none and undefined
//! rendering as empty text.

use minijinja::value::ValueKind;
use minijinja::{Environment, Value as JinjaValue};
use serde_json::{Map, Value};

use crate::error::EvaluationError;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
  Literal(&'a str),
  Expression(&'a str),
}

/// Split a template into literal text and expressions.
pub(crate) fn parse(template: &str) -> Result<Vec<Segment<'_>>, EvaluationError> {
  let mut segments = Vec::new();
  let mut rest = template;

  while let Some(start) = rest.find(OPEN) {
    if start > 0 {
      segments.push(Segment::Literal(&rest[..start]));
    }
    let after = &rest[start + OPEN.len()..];
    let Some(end) = after.find(CLOSE) else {
      return Err(EvaluationError::Unterminated {
        template: template.to_string(),
      });
    };
    segments.push(Segment::Expression(after[..end].trim()));
    rest = &after[end + CLOSE.len()..];
  }

  if !rest.is_empty() {
    segments.push(Segment::Literal(rest));
  }
  Ok(segments)
}

/// The bare expression of a condition written with or without delimiters.
pub(crate) fn strip_delimiters(condition: &str) -> Result<&str, EvaluationError> {
  let trimmed = condition.trim();
  match parse(trimmed)?.as_slice() {
    [Segment::Expression(expression)] => Ok(*expression),
    _ => Ok(trimmed),
  }
}

pub(crate) fn eval_expression<'source>(
  env: &Environment<'source>,
  expression: &'source str,
  scope: &JinjaValue,
) -> Result<JinjaValue, EvaluationError> {
  let wrap = |source: minijinja::Error| EvaluationError::Expression {
    expression: expression.to_string(),
    source,
  };
  let compiled = env.compile_expression(expression).map_err(wrap)?;
  compiled.eval(scope).map_err(wrap)
}

pub(crate) fn to_json(value: &JinjaValue) -> Result<Value, EvaluationError> {
  if value.is_undefined() || value.is_none() {
    return Ok(Value::Null);
  }
  serde_json::to_value(value).map_err(|source| EvaluationError::Conversion { source })
}

/// Evaluate a single template string.
pub(crate) fn evaluate_template<'source>(
  env: &Environment<'source>,
  template: &'source str,
  scope: &JinjaValue,
) -> Result<Value, EvaluationError> {
  let segments = parse(template)?;
  if let [Segment::Expression(expression)] = segments.as_slice() {
    return to_json(&eval_expression(env, expression, scope)?);
  }

  let mut rendered = String::with_capacity(template.len());
  for segment in segments {
    match segment {
      Segment::Literal(text) => rendered.push_str(text),
      Segment::Expression(expression) => match to_json(&eval_expression(env, expression, scope)?)? {
        Value::Null => {}
        Value::String(s) => rendered.push_str(&s),
        other => rendered.push_str(&other.to_string()),
      },
    }
  }
  Ok(Value::String(rendered))
}

/// Evaluate every string in a JSON tree. Object keys are left as is.
pub(crate) fn evaluate_json<'source>(
  env: &Environment<'source>,
  value: &'source Value,
  scope: &JinjaValue,
) -> Result<Value, EvaluationError> {
  match value {
    Value::String(template) => evaluate_template(env, template, scope),
    Value::Array(items) => items
      .iter()
      .map(|item| evaluate_json(env, item, scope))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(map) => map
      .iter()
      .map(|(k, v)| Ok((k.clone(), evaluate_json(env, v, scope)?)))
      .collect::<Result<Map<_, _>, EvaluationError>>()
      .map(Value::Object),
    other => Ok(other.clone()),
  }
}

/// Evaluate a condition that must produce a boolean.
pub(crate) fn evaluate_condition<'source>(
  env: &Environment<'source>,
  condition: &'source str,
  scope: &JinjaValue,
) -> Result<bool, EvaluationError> {
  let expression = strip_delimiters(condition)?;
  let value = eval_expression(env, expression, scope)?;
  if value.kind() != ValueKind::Bool {
    return Err(EvaluationError::NonBoolean {
      expression: expression.to_string(),
      kind: value.kind().to_string(),
    });
  }
  Ok(value.is_true())
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
