use std::collections::HashSet;

use pipewright_config::{ExecutionContext, ExecutionKind, StepConfig, VariableValue};
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::slug::slugify;

/// A reusable, parameterized step list.
///
/// `key`, `name`, `description` and `steps` are required when reading JSON;
/// everything else defaults. Built-in templates have no `id`; user templates
/// get one when they are saved or imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
  /// Globally unique, across built-in and user templates.
  pub key: String,
  pub name: String,
  pub description: String,
  pub steps: Vec<TemplateStep>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub framework: String,
  #[serde(default)]
  pub category: String,
  #[serde(default)]
  pub variables: Vec<TemplateVariable>,
  #[serde(default)]
  pub default_context: ExecutionContext,
  #[serde(default)]
  pub tags: Vec<String>,
}

/// A step definition inside a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStep {
  /// Template-local key other steps refer to in `depends_on`. Falls back to
  /// the slug of `name`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,
  pub name: String,
  /// Overrides the template's default execution kind.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub execution: Option<ExecutionKind>,
  #[serde(default)]
  pub config: StepConfig,
  /// Template-local keys.
  #[serde(default, alias = "dependsOn")]
  pub depends_on: Vec<String>,
}

impl TemplateStep {
  pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      key: Some(key.into()),
      name: name.into(),
      execution: None,
      config: StepConfig::new(),
      depends_on: Vec::new(),
    }
  }

  pub fn depends_on<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = keys.into_iter().map(Into::into).collect();
    self
  }

  pub fn command(mut self, command: impl Into<String>) -> Self {
    self
      .config
      .insert("command".to_string(), serde_json::Value::String(command.into()));
    self
  }

  pub fn execution(mut self, kind: ExecutionKind) -> Self {
    self.execution = Some(kind);
    self
  }

  /// The key other steps use to refer to this one.
  pub fn local_key(&self) -> Option<String> {
    self.key.clone().or_else(|| slugify(&self.name))
  }
}

/// A variable declaration with its default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVariable {
  pub name: String,
  pub default: VariableValue,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

impl TemplateVariable {
  pub fn new(name: impl Into<String>, default: impl Into<VariableValue>) -> Self {
    Self {
      name: name.into(),
      default: default.into(),
      description: None,
    }
  }
}

impl Template {
  pub fn new(key: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      name: name.into(),
      description: description.into(),
      steps: Vec::new(),
      id: None,
      framework: String::new(),
      category: String::new(),
      variables: Vec::new(),
      default_context: ExecutionContext::default(),
      tags: Vec::new(),
    }
  }

  /// Local keys in declaration order.
  ///
  /// Fails on a step without a usable key or on a key declared twice.
  pub fn local_keys(&self) -> Result<Vec<String>, TemplateError> {
    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(self.steps.len());

    for (index, step) in self.steps.iter().enumerate() {
      let key = step.local_key().ok_or_else(|| TemplateError::UnnamedStep {
        template: self.key.clone(),
        index,
      })?;
      if !seen.insert(key.clone()) {
        return Err(TemplateError::DuplicateStepId {
          template: self.key.clone(),
          step_id: key,
        });
      }
      keys.push(key);
    }

    Ok(keys)
  }

  /// Check that every `depends_on` entry names a key declared in this
  /// template.
  pub fn check_references(&self) -> Result<(), TemplateError> {
    let keys: HashSet<String> = self.local_keys()?.into_iter().collect();

    for step in &self.steps {
      for dep in &step.depends_on {
        if !keys.contains(dep) {
          return Err(TemplateError::DanglingDependency {
            template: self.key.clone(),
            step: step.local_key().unwrap_or_else(|| step.name.clone()),
            depends_on: dep.clone(),
          });
        }
      }
    }

    Ok(())
  }
}
