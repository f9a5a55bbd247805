use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreightOriginKind {
  #[default]
  Warehouse,
}

impl fmt::Display for FreightOriginKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FreightOriginKind::Warehouse => write!(f, "Warehouse"),
    }
  }
}

/// Where a piece of Freight came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreightOrigin {
  pub kind: FreightOriginKind,
  pub name: String,
}

impl FreightOrigin {
  pub fn warehouse(name: impl Into<String>) -> Self {
    Self {
      kind: FreightOriginKind::Warehouse,
      name: name.into(),
    }
  }

  /// Key under which Freight from this origin is stored in a collection.
  pub fn key(&self) -> String {
    format!("{}/{}", self.kind, self.name)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
  #[serde(rename = "repoURL")]
  pub repo_url: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub branch: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub tag: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub message: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
  #[serde(rename = "repoURL")]
  pub repo_url: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub tag: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
  #[serde(rename = "repoURL")]
  pub repo_url: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub version: String,
}

/// A versioned bundle of promotable artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightReference {
  pub name: String,
  pub origin: FreightOrigin,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub commits: Vec<GitCommit>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub images: Vec<Image>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub charts: Vec<Chart>,
}

/// The Freight currently referenced by a Stage, keyed by origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightCollection {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default)]
  pub items: BTreeMap<String, FreightReference>,
}

impl FreightCollection {
  /// Add or replace the Freight for its origin.
  pub fn update_or_push(&mut self, freight: FreightReference) {
    self.items.insert(freight.origin.key(), freight);
  }

  /// Freight from a specific origin.
  pub fn get(&self, origin: &FreightOrigin) -> Option<&FreightReference> {
    self.items.get(&origin.key())
  }

  pub fn references(&self) -> impl Iterator<Item = &FreightReference> {
    self.items.values()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// Where a Stage may obtain Freight from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightSources {
  #[serde(default)]
  pub direct: bool,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub stages: Vec<String>,
}

/// A Stage's request for Freight from an origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightRequest {
  pub origin: FreightOrigin,
  #[serde(default)]
  pub sources: FreightSources,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_origin_key() {
    assert_eq!(FreightOrigin::warehouse("main").key(), "Warehouse/main");
  }

  #[test]
  fn test_collection_replaces_by_origin() {
    let mut collection = FreightCollection::default();
    collection.update_or_push(FreightReference {
      name: "abc".to_string(),
      origin: FreightOrigin::warehouse("main"),
      ..Default::default()
    });
    collection.update_or_push(FreightReference {
      name: "def".to_string(),
      origin: FreightOrigin::warehouse("main"),
      ..Default::default()
    });

    assert_eq!(collection.references().count(), 1);
    assert_eq!(
      collection.get(&FreightOrigin::warehouse("main")).map(|f| f.name.as_str()),
      Some("def")
    );
  }

  #[test]
  fn test_commit_wire_format() {
    let commit: GitCommit = serde_json::from_str(
      r#"{ "repoURL": "https://github.com/example/app", "id": "1234abcd" }"#,
    )
    .unwrap();
    assert_eq!(commit.repo_url, "https://github.com/example/app");
    assert_eq!(commit.id, "1234abcd");
  }
}
