//! Per-step memoization of expression function lookups.
//!
//! A fresh cache is created for every step so results never go stale
//! across steps, while repeated lookups during one step's evaluation and
//! context build are computed once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Shared lookup cache. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct LookupCache {
  entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl LookupCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Get a cached value, or compute and cache it.
  ///
  /// Errors are not cached.
  pub fn get_or_try_insert<E>(
    &self,
    key: &str,
    compute: impl FnOnce() -> Result<Value, E>,
  ) -> Result<Value, E> {
    {
      let entries = match self.entries.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
      };
      if let Some(value) = entries.get(key) {
        return Ok(value.clone());
      }
    }

    let value = compute()?;

    let mut entries = match self.entries.write() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    entries.insert(key.to_string(), value.clone());
    Ok(value)
  }

  pub fn len(&self) -> usize {
    match self.entries.read() {
      Ok(guard) => guard.len(),
      Err(poisoned) => poisoned.into_inner().len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::cell::Cell;

  #[test]
  fn test_computes_once() {
    let cache = LookupCache::new();
    let calls = Cell::new(0);

    for _ in 0..3 {
      let value = cache
        .get_or_try_insert::<()>("k", || {
          calls.set(calls.get() + 1);
          Ok(json!("v"))
        })
        .unwrap();
      assert_eq!(value, json!("v"));
    }

    assert_eq!(calls.get(), 1);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_errors_are_not_cached() {
    let cache = LookupCache::new();
    let result = cache.get_or_try_insert("k", || Err("boom"));
    assert_eq!(result, Err("boom"));
    assert!(cache.is_empty());

    let clone = cache.clone();
    clone.get_or_try_insert::<()>("k", || Ok(json!(1))).unwrap();
    assert_eq!(cache.len(), 1);
  }
}
