use std::collections::BTreeMap;
use std::fmt;

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};

/// How the remote executor runs a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
  /// Run through a language SDK toolchain (npm, cargo, pip, ...).
  Sdk,
  /// Run inside a container.
  Docker,
  /// Run as a plain shell command on the executor host.
  Shell,
}

impl ExecutionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionKind::Sdk => "sdk",
      ExecutionKind::Docker => "docker",
      ExecutionKind::Shell => "shell",
    }
  }
}

impl fmt::Display for ExecutionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Where and how a pipeline's steps run.
///
/// The working directory is a template string, e.g.
/// `"{{ project_path }}/frontend"`, rendered at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
  pub kind: ExecutionKind,
  /// SDK identifier, e.g. "node@20" or "rust@stable".
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sdk: Option<String>,
  #[serde(default = "default_working_directory")]
  pub working_directory: String,
}

fn default_working_directory() -> String {
  "{{ project_path }}".to_string()
}

impl Default for ExecutionContext {
  fn default() -> Self {
    Self {
      kind: ExecutionKind::Shell,
      sdk: None,
      working_directory: default_working_directory(),
    }
  }
}

impl ExecutionContext {
  /// Render the working directory template against `vars`.
  ///
  /// Undefined placeholders are an error rather than an empty string, so a
  /// missing `project_path` never silently turns into `/`.
  pub fn render_working_directory(
    &self,
    vars: &BTreeMap<String, String>,
  ) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.render_str(&self.working_directory, vars)
  }
}
