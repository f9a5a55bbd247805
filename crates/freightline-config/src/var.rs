use serde::{Deserialize, Serialize};

/// A named expression, evaluated into a promotion variable.
///
/// The value is a template string; `${{ ... }}` segments are evaluated
/// against the promotion's expression environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionVariable {
  pub name: String,
  #[serde(default)]
  pub value: String,
}

impl ExpressionVariable {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
    }
  }
}
