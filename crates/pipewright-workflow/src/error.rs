use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structural problem in a step list.
///
/// These are expected, user-correctable states and are returned as data,
/// never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
  #[error("duplicate step id: {step_id}")]
  DuplicateStepId { step_id: String },

  #[error("step '{step_id}' depends on unknown step '{depends_on}'")]
  UnknownDependency { step_id: String, depends_on: String },

  /// `path` starts and ends with the same id, e.g. `[a, b, a]`.
  #[error("dependency cycle detected: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },
}
