use pipewright_store::StoreError;
use thiserror::Error;

/// Errors from a secret vault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
  #[error("secret not found: {0}")]
  NotFound(String),

  #[error("failed to decrypt secret '{secret_id}': {message}")]
  Decryption { secret_id: String, message: String },
}

/// Errors that abort resolution.
///
/// Vault failures are not among them: an undecryptable secret resolves to
/// absent and is logged.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("failed to load scope: {0}")]
  Store(#[from] StoreError),
}
