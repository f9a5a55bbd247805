//! Shared promotion state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use freightline_config::{Step, TASK_NAMESPACE_SEPARATOR};

/// Step outputs keyed by alias (or task namespace).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

impl State {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn set(&mut self, key: impl Into<String>, value: Value) {
    self.0.insert(key.into(), value);
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }

  pub fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }

  /// Merge a step's output into `State[key]`.
  ///
  /// Keys of an existing object entry are kept unless overwritten.
  pub fn merge_output(&mut self, key: &str, output: &Map<String, Value>) {
    match self.0.get_mut(key) {
      Some(Value::Object(existing)) => {
        for (k, v) in output {
          existing.insert(k.clone(), v.clone());
        }
      }
      _ => {
        self.0.insert(key.to_string(), Value::Object(output.clone()));
      }
    }
  }

  /// Merge a namespaced step's output under its bare task namespace, so
  /// `"task::x"` lands at `State["task"]["x"]`.
  ///
  /// Does nothing for aliases without a namespace.
  pub fn merge_task_output(&mut self, alias: &str, output: &Map<String, Value>) {
    let Some(namespace) = Step::namespace_of(alias) else {
      return;
    };
    let name = Step::strip_namespace(alias).to_string();

    let entry = self
      .0
      .entry(namespace.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }
    if let Value::Object(task) = entry {
      match task.get_mut(&name) {
        Some(Value::Object(existing)) => {
          for (k, v) in output {
            existing.insert(k.clone(), v.clone());
          }
        }
        _ => {
          task.insert(name, Value::Object(output.clone()));
        }
      }
    }
  }

  /// Outputs of steps in `namespace`, re-keyed without the prefix.
  pub fn task_outputs(&self, namespace: &str) -> Map<String, Value> {
    let prefix = format!("{}{}", namespace, TASK_NAMESPACE_SEPARATOR);
    self
      .0
      .iter()
      .filter_map(|(k, v)| {
        k.strip_prefix(&prefix)
          .map(|name| (name.to_string(), v.clone()))
      })
      .collect()
  }
}

impl From<Map<String, Value>> for State {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}
