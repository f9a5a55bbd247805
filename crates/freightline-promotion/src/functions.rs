//! Functions available inside step expressions.

use std::sync::Arc;

use freightline_config::{FreightCollection, FreightOrigin, FreightReference};
use freightline_credentials::{CredentialType, normalize_repo_url};
use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, Value as JinjaValue};
use serde::Serialize;
use serde_json::Value;

use crate::cache::LookupCache;
use crate::metadata::StepExecutionMetadataList;

/// Snapshot of the context the functions read from.
#[derive(Debug, Clone)]
pub(crate) struct FunctionScope {
  pub freight: FreightCollection,
  pub metadata: StepExecutionMetadataList,
  pub current_alias: String,
  pub cache: LookupCache,
}

/// Register all expression functions into `env`.
pub(crate) fn register_functions(env: &mut Environment<'_>, scope: FunctionScope) {
  let scope = Arc::new(scope);

  env.add_function("always", || true);

  let s = scope.clone();
  env.add_function("success", move || {
    !s.metadata.has_failures_excluding(&s.current_alias)
  });

  let s = scope.clone();
  env.add_function("failure", move || {
    s.metadata.has_failures_excluding(&s.current_alias)
  });

  let s = scope.clone();
  env.add_function("status", move |alias: String| -> Option<String> {
    s.metadata.get(&alias).map(|m| m.status.to_string())
  });

  env.add_function("warehouse", |name: String| {
    JinjaValue::from_serialize(FreightOrigin::warehouse(name))
  });

  let s = scope.clone();
  env.add_function(
    "commitFrom",
    move |repo_url: String, origin: Option<JinjaValue>| -> Result<JinjaValue, Error> {
      let origin = origin.map(|o| parse_origin(&o)).transpose()?;
      s.lookup("commit", &repo_url, None, origin.as_ref(), |freight| {
        freight
          .commits
          .iter()
          .find(|c| same_repo(CredentialType::Git, &c.repo_url, &repo_url))
      })
    },
  );

  let s = scope.clone();
  env.add_function(
    "imageFrom",
    move |repo_url: String, origin: Option<JinjaValue>| -> Result<JinjaValue, Error> {
      let origin = origin.map(|o| parse_origin(&o)).transpose()?;
      s.lookup("image", &repo_url, None, origin.as_ref(), |freight| {
        freight
          .images
          .iter()
          .find(|i| same_repo(CredentialType::Image, &i.repo_url, &repo_url))
      })
    },
  );

  let s = scope;
  env.add_function(
    "chartFrom",
    move |repo_url: String,
          first: Option<JinjaValue>,
          second: Option<JinjaValue>|
          -> Result<JinjaValue, Error> {
      let mut chart_name = None;
      let mut origin = None;
      for arg in [first, second].into_iter().flatten() {
        match arg.kind() {
          ValueKind::String if chart_name.is_none() => {
            chart_name = arg.as_str().map(str::to_string);
          }
          ValueKind::Map if origin.is_none() => origin = Some(parse_origin(&arg)?),
          ValueKind::None | ValueKind::Undefined => {}
          kind => {
            return Err(Error::new(
              ErrorKind::InvalidOperation,
              format!("chartFrom: unexpected {} argument", kind),
            ));
          }
        }
      }

      let name = chart_name.as_deref();
      s.lookup("chart", &repo_url, name, origin.as_ref(), |freight| {
        freight.charts.iter().find(|c| {
          same_repo(CredentialType::Helm, &c.repo_url, &repo_url)
            && name.is_none_or(|n| c.name == n)
        })
      })
    },
  );
}

impl FunctionScope {
  /// Find the one artifact matching `select` across the Freight collection.
  ///
  /// Without an origin the artifact must come from exactly one piece of
  /// Freight. A miss yields none.
  fn lookup<T, F>(
    &self,
    what: &str,
    repo_url: &str,
    name: Option<&str>,
    origin: Option<&FreightOrigin>,
    select: F,
  ) -> Result<JinjaValue, Error>
  where
    T: Serialize,
    F: Fn(&FreightReference) -> Option<&T>,
  {
    let key = format!(
      "{}|{}|{}|{}",
      what,
      repo_url,
      name.unwrap_or_default(),
      origin.map(FreightOrigin::key).unwrap_or_default()
    );

    let value = self.cache.get_or_try_insert(&key, || {
      let candidates: Vec<&FreightReference> = match origin {
        Some(origin) => self.freight.get(origin).into_iter().collect(),
        None => self.freight.references().collect(),
      };

      let mut found = None;
      for freight in candidates {
        if let Some(item) = select(freight) {
          if found.is_some() {
            return Err(Error::new(
              ErrorKind::InvalidOperation,
              format!(
                "{} from '{}' found in multiple Freight; specify an origin",
                what, repo_url
              ),
            ));
          }
          found = Some(item);
        }
      }

      match found {
        Some(item) => serde_json::to_value(item).map_err(|e| {
          Error::new(ErrorKind::InvalidOperation, "failed to serialize artifact").with_source(e)
        }),
        None => Ok(Value::Null),
      }
    })?;

    Ok(JinjaValue::from_serialize(&value))
  }
}

fn parse_origin(value: &JinjaValue) -> Result<FreightOrigin, Error> {
  let invalid = |e: serde_json::Error| {
    Error::new(ErrorKind::InvalidOperation, "invalid Freight origin").with_source(e)
  };
  let json = serde_json::to_value(value).map_err(invalid)?;
  serde_json::from_value(json).map_err(invalid)
}

/// Repository URLs match the same way credential lookups do.
fn same_repo(credential_type: CredentialType, a: &str, b: &str) -> bool {
  match (
    normalize_repo_url(credential_type, a),
    normalize_repo_url(credential_type, b),
  ) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}
