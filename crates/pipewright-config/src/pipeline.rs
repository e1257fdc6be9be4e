use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::step::Step;
use crate::variable::Variable;

/// A pipeline definition owned by a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
  pub id: String,
  pub project_id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// Steps in declaration order. Declaration order is the tie-break used
  /// when planning waves.
  pub steps: Vec<Step>,
  #[serde(default)]
  pub variables: Vec<Variable>,
  /// Ids of secret references attached to this pipeline.
  #[serde(default)]
  pub secret_refs: Vec<String>,
  #[serde(default)]
  pub context: ExecutionContext,
  #[serde(default = "enabled_default")]
  pub enabled: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

fn enabled_default() -> bool {
  true
}

impl Pipeline {
  /// Create a new, empty, enabled pipeline with a fresh id.
  pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      project_id: project_id.into(),
      name: name.into(),
      description: String::new(),
      steps: Vec::new(),
      variables: Vec::new(),
      secret_refs: Vec::new(),
      context: ExecutionContext::default(),
      enabled: true,
      created_at: now,
      updated_at: now,
    }
  }

  /// Get a step by id.
  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.id == step_id)
  }

  /// Bump `updated_at`.
  pub fn touch(&mut self) {
    self.updated_at = Utc::now();
  }
}
