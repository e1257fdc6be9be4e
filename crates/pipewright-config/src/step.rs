use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::ExecutionKind;

/// Free-form step configuration (command, image, arguments, ...).
///
/// Opaque to the core; forwarded to the remote executor as-is.
pub type StepConfig = serde_json::Map<String, serde_json::Value>;

/// Dispatch tag telling the remote executor how to run a step.
///
/// Carries the execution kind and the target step id as separate fields so
/// the executor never has to split a string to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKind {
  pub execution: ExecutionKind,
  pub target: String,
}

impl StepKind {
  pub fn new(execution: ExecutionKind, target: impl Into<String>) -> Self {
    Self {
      execution,
      target: target.into(),
    }
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.execution, self.target)
  }
}

/// A single unit of work in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  /// Unique within the owning pipeline.
  pub id: String,
  pub kind: StepKind,
  pub name: String,
  #[serde(default)]
  pub config: StepConfig,
  /// Ids of steps in the same pipeline that must succeed first.
  #[serde(default)]
  pub depends_on: Vec<String>,
}

impl Step {
  /// Create a step with an empty config and no dependencies.
  pub fn new(id: impl Into<String>, name: impl Into<String>, execution: ExecutionKind) -> Self {
    let id = id.into();
    Self {
      kind: StepKind::new(execution, id.clone()),
      id,
      name: name.into(),
      config: StepConfig::new(),
      depends_on: Vec::new(),
    }
  }

  /// Builder-style helper to declare dependencies.
  pub fn depends_on<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = ids.into_iter().map(Into::into).collect();
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_step_kind_display() {
    let kind = StepKind::new(ExecutionKind::Docker, "build");
    assert_eq!(kind.to_string(), "docker:build");
  }

  #[test]
  fn test_step_deserialize_defaults() {
    let step: Step = serde_json::from_str(
      r#"{"id": "lint", "kind": {"execution": "sdk", "target": "lint"}, "name": "Lint"}"#,
    )
    .unwrap();

    assert_eq!(step.id, "lint");
    assert!(step.config.is_empty());
    assert!(step.depends_on.is_empty());
  }
}
