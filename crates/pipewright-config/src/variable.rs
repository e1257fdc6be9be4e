use std::fmt;

use serde::{Deserialize, Serialize};

/// The ownership level at which variables and secret references are declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
  Project(String),
  Pipeline(String),
}

impl Scope {
  pub fn project(id: impl Into<String>) -> Self {
    Scope::Project(id.into())
  }

  pub fn pipeline(id: impl Into<String>) -> Self {
    Scope::Pipeline(id.into())
  }

  /// Owner id (project id or pipeline id).
  pub fn id(&self) -> &str {
    match self {
      Scope::Project(id) | Scope::Pipeline(id) => id,
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Scope::Project(id) => write!(f, "project:{id}"),
      Scope::Pipeline(id) => write!(f, "pipeline:{id}"),
    }
  }
}

/// A typed variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VariableValue {
  String(String),
  Number(f64),
  Boolean(bool),
}

impl VariableValue {
  /// Render as the string placed in the runtime environment.
  pub fn as_env(&self) -> String {
    match self {
      VariableValue::String(s) => s.clone(),
      VariableValue::Number(n) => n.to_string(),
      VariableValue::Boolean(b) => b.to_string(),
    }
  }
}

impl From<&str> for VariableValue {
  fn from(value: &str) -> Self {
    VariableValue::String(value.to_string())
  }
}

impl From<String> for VariableValue {
  fn from(value: String) -> Self {
    VariableValue::String(value)
  }
}

impl From<bool> for VariableValue {
  fn from(value: bool) -> Self {
    VariableValue::Boolean(value)
  }
}

impl From<f64> for VariableValue {
  fn from(value: f64) -> Self {
    VariableValue::Number(value)
  }
}

/// A plain key/value variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
  /// Unique within its scope.
  pub name: String,
  pub value: VariableValue,
  pub scope: Scope,
}

impl Variable {
  pub fn new(name: impl Into<String>, value: impl Into<VariableValue>, scope: Scope) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
      scope,
    }
  }
}

/// Pointer to a value held by an external secret vault.
///
/// Never carries the secret value itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
  /// Opaque vault key.
  pub id: String,
  /// Name under which the resolved value is exposed.
  pub name: String,
  pub scope: Scope,
}

impl SecretReference {
  pub fn new(id: impl Into<String>, name: impl Into<String>, scope: Scope) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      scope,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_variable_value_as_env() {
    assert_eq!(VariableValue::from("x").as_env(), "x");
    assert_eq!(VariableValue::Number(3.0).as_env(), "3");
    assert_eq!(VariableValue::Number(1.5).as_env(), "1.5");
    assert_eq!(VariableValue::Boolean(true).as_env(), "true");
  }

  #[test]
  fn test_scope_serde() {
    let json = serde_json::to_value(Scope::pipeline("p1")).unwrap();
    assert_eq!(json, serde_json::json!({"scope": "pipeline", "id": "p1"}));

    let back: Scope = serde_json::from_value(json).unwrap();
    assert_eq!(back, Scope::Pipeline("p1".to_string()));
  }

  #[test]
  fn test_variable_value_serde() {
    let json = serde_json::to_value(VariableValue::Boolean(false)).unwrap();
    assert_eq!(json, serde_json::json!({"type": "boolean", "value": false}));
  }
}
