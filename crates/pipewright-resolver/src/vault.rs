use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::VaultError;

/// External secret vault.
///
/// Storage and encryption at rest are the vault's business; pipewright only
/// asks for a plaintext value at the moment it is needed.
#[async_trait]
pub trait SecretVault: Send + Sync {
  async fn decrypt(&self, secret_id: &str) -> Result<String, VaultError>;
}

/// In-memory vault.
///
/// Suitable for tests and local development. Entries registered through
/// [`InMemoryVault::insert_undecryptable`] fail with
/// [`VaultError::Decryption`].
#[derive(Debug, Default)]
pub struct InMemoryVault {
  secrets: RwLock<HashMap<String, Option<String>>>,
}

impl InMemoryVault {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, secret_id: impl Into<String>, value: impl Into<String>) {
    self
      .secrets
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(secret_id.into(), Some(value.into()));
  }

  pub fn insert_undecryptable(&self, secret_id: impl Into<String>) {
    self
      .secrets
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(secret_id.into(), None);
  }
}

#[async_trait]
impl SecretVault for InMemoryVault {
  async fn decrypt(&self, secret_id: &str) -> Result<String, VaultError> {
    let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
    match secrets.get(secret_id) {
      Some(Some(value)) => Ok(value.clone()),
      Some(None) => Err(VaultError::Decryption {
        secret_id: secret_id.to_string(),
        message: "ciphertext rejected".to_string(),
      }),
      None => Err(VaultError::NotFound(secret_id.to_string())),
    }
  }
}

/// Vault backed by process environment variables.
///
/// Secret `vault/npm-token` is read from `{PREFIX}VAULT_NPM_TOKEN`: the id is
/// upper-cased and every non-alphanumeric character becomes `_`.
#[derive(Debug, Clone)]
pub struct EnvVault {
  prefix: String,
}

impl EnvVault {
  pub const DEFAULT_PREFIX: &'static str = "PIPEWRIGHT_SECRET_";

  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
    }
  }

  pub fn variable_name(&self, secret_id: &str) -> String {
    let suffix: String = secret_id
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() {
          c.to_ascii_uppercase()
        } else {
          '_'
        }
      })
      .collect();
    format!("{}{}", self.prefix, suffix)
  }
}

impl Default for EnvVault {
  fn default() -> Self {
    Self::new(Self::DEFAULT_PREFIX)
  }
}

#[async_trait]
impl SecretVault for EnvVault {
  async fn decrypt(&self, secret_id: &str) -> Result<String, VaultError> {
    let name = self.variable_name(secret_id);
    match std::env::var(&name) {
      Ok(value) => Ok(value),
      Err(std::env::VarError::NotPresent) => Err(VaultError::NotFound(secret_id.to_string())),
      Err(std::env::VarError::NotUnicode(_)) => Err(VaultError::Decryption {
        secret_id: secret_id.to_string(),
        message: format!("{name} is not valid unicode"),
      }),
    }
  }
}
