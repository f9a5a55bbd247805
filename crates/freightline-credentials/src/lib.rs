//! Credential lookup for step runners.
//!
//! Step runners that declare the credential capability receive a
//! [`CredentialsDatabase`] handle. Lookups are keyed by namespace (the
//! promotion's project), credential type and repository URL.

mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{InMemoryCredentialsDatabase, normalize_repo_url};

/// The kind of repository a credential grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
  Git,
  Helm,
  Image,
  Generic,
}

impl fmt::Display for CredentialType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      CredentialType::Git => "git",
      CredentialType::Helm => "helm",
      CredentialType::Image => "image",
      CredentialType::Generic => "generic",
    };
    write!(f, "{}", s)
  }
}

/// Credentials for a single repository.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub password: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ssh_private_key: Option<String>,
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .field("password", &"***")
      .field("ssh_private_key", &self.ssh_private_key.as_ref().map(|_| "***"))
      .finish()
  }
}

/// Error type for credential lookups.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
  /// The repository URL could not be interpreted.
  #[error("invalid repository URL '{repo_url}'")]
  InvalidRepoUrl { repo_url: String },

  /// The backing store failed.
  #[error("credentials backend error: {message}")]
  Backend { message: String },
}

/// Lookup of repository credentials.
#[async_trait]
pub trait CredentialsDatabase: Send + Sync {
  /// Find credentials for `repo_url` in `namespace`.
  ///
  /// Returns `Ok(None)` when no credentials are stored for the repository.
  async fn get(
    &self,
    namespace: &str,
    credential_type: CredentialType,
    repo_url: &str,
  ) -> Result<Option<Credentials>, CredentialsError>;
}
