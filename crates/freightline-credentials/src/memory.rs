use std::collections::HashMap;

use async_trait::async_trait;

use crate::{CredentialType, Credentials, CredentialsDatabase, CredentialsError};

/// In-memory credentials store.
///
/// Suitable for the CLI and for testing. Repository URLs are normalized
/// before comparison so `https://host/repo.git/` and `https://host/repo`
/// resolve to the same entry.
#[derive(Debug, Default)]
pub struct InMemoryCredentialsDatabase {
  entries: HashMap<(String, CredentialType, String), Credentials>,
}

impl InMemoryCredentialsDatabase {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store credentials, replacing any previous entry for the same key.
  pub fn insert(
    &mut self,
    namespace: &str,
    credential_type: CredentialType,
    repo_url: &str,
    credentials: Credentials,
  ) -> Result<(), CredentialsError> {
    let key = (
      namespace.to_string(),
      credential_type,
      normalize_repo_url(credential_type, repo_url)?,
    );
    self.entries.insert(key, credentials);
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[async_trait]
impl CredentialsDatabase for InMemoryCredentialsDatabase {
  async fn get(
    &self,
    namespace: &str,
    credential_type: CredentialType,
    repo_url: &str,
  ) -> Result<Option<Credentials>, CredentialsError> {
    let key = (
      namespace.to_string(),
      credential_type,
      normalize_repo_url(credential_type, repo_url)?,
    );
    Ok(self.entries.get(&key).cloned())
  }
}

/// Canonical form of a repository URL used for matching.
///
/// Surrounding whitespace and trailing slashes are dropped and the URL is
/// lowercased. Git URLs also lose a trailing `.git`.
pub fn normalize_repo_url(
  credential_type: CredentialType,
  repo_url: &str,
) -> Result<String, CredentialsError> {
  let trimmed = repo_url.trim();
  if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
    return Err(CredentialsError::InvalidRepoUrl {
      repo_url: repo_url.to_string(),
    });
  }

  let mut normalized = trimmed.trim_end_matches('/').to_lowercase();
  if credential_type == CredentialType::Git
    && let Some(stripped) = normalized.strip_suffix(".git")
  {
    normalized = stripped.to_string();
  }
  Ok(normalized)
}
