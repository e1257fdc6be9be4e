/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same identity already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A pipeline id that cannot be used as a file name.
  #[error("invalid pipeline id {0:?}")]
  InvalidId(String),

  /// Filesystem error.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A stored record could not be (de)serialized.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
