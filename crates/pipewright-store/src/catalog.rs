//! Store-agnostic bookkeeping shared by the in-memory and filesystem stores.

use std::collections::HashMap;

use chrono::Utc;
use pipewright_config::{Pipeline, Scope, SecretReference, Variable};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Project-scoped variables and all secret references.
///
/// Pipeline-scoped variables live on the pipeline itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Scopes {
  #[serde(default)]
  pub variables: Vec<Variable>,
  #[serde(default)]
  pub secret_references: Vec<SecretReference>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
  pub pipelines: HashMap<String, Pipeline>,
  pub scopes: Scopes,
}

impl Catalog {
  pub fn create(&mut self, pipeline: Pipeline) -> Result<Pipeline, StoreError> {
    if self.pipelines.contains_key(&pipeline.id) {
      return Err(StoreError::AlreadyExists(format!("pipeline {}", pipeline.id)));
    }
    self.pipelines.insert(pipeline.id.clone(), pipeline.clone());
    Ok(pipeline)
  }

  pub fn get(&self, pipeline_id: &str) -> Result<&Pipeline, StoreError> {
    self
      .pipelines
      .get(pipeline_id)
      .ok_or_else(|| StoreError::NotFound(format!("pipeline {pipeline_id}")))
  }

  fn get_mut(&mut self, pipeline_id: &str) -> Result<&mut Pipeline, StoreError> {
    self
      .pipelines
      .get_mut(pipeline_id)
      .ok_or_else(|| StoreError::NotFound(format!("pipeline {pipeline_id}")))
  }

  pub fn update(&mut self, mut pipeline: Pipeline) -> Result<Pipeline, StoreError> {
    let existing = self.get_mut(&pipeline.id)?;
    pipeline.created_at = existing.created_at;
    pipeline.updated_at = Utc::now();
    *existing = pipeline.clone();
    Ok(pipeline)
  }

  pub fn delete(&mut self, pipeline_id: &str) -> Result<(), StoreError> {
    self
      .pipelines
      .remove(pipeline_id)
      .ok_or_else(|| StoreError::NotFound(format!("pipeline {pipeline_id}")))?;

    let scope = Scope::Pipeline(pipeline_id.to_string());
    self
      .scopes
      .secret_references
      .retain(|r| r.scope != scope);
    Ok(())
  }

  pub fn list(&self, project_id: Option<&str>) -> Vec<Pipeline> {
    let mut pipelines: Vec<Pipeline> = self
      .pipelines
      .values()
      .filter(|p| project_id.is_none_or(|id| p.project_id == id))
      .cloned()
      .collect();
    pipelines.sort_by(|a, b| {
      a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.name.cmp(&b.name))
    });
    pipelines
  }

  pub fn list_variables(&self, scope: &Scope) -> Result<Vec<Variable>, StoreError> {
    match scope {
      Scope::Project(_) => Ok(
        self
          .scopes
          .variables
          .iter()
          .filter(|v| &v.scope == scope)
          .cloned()
          .collect(),
      ),
      Scope::Pipeline(id) => Ok(self.get(id)?.variables.clone()),
    }
  }

  pub fn set_variable(&mut self, variable: Variable) -> Result<(), StoreError> {
    let variables = match &variable.scope {
      Scope::Project(_) => &mut self.scopes.variables,
      Scope::Pipeline(id) => {
        let pipeline = self.get_mut(id)?;
        pipeline.updated_at = Utc::now();
        &mut pipeline.variables
      }
    };

    match variables
      .iter_mut()
      .find(|v| v.name == variable.name && v.scope == variable.scope)
    {
      Some(existing) => *existing = variable,
      None => variables.push(variable),
    }
    Ok(())
  }

  pub fn delete_variable(&mut self, scope: &Scope, name: &str) -> Result<(), StoreError> {
    let variables = match scope {
      Scope::Project(_) => &mut self.scopes.variables,
      Scope::Pipeline(id) => {
        let pipeline = self.get_mut(id)?;
        pipeline.updated_at = Utc::now();
        &mut pipeline.variables
      }
    };

    let before = variables.len();
    variables.retain(|v| !(v.name == name && &v.scope == scope));
    if variables.len() == before {
      return Err(StoreError::NotFound(format!("variable {name} in {scope}")));
    }
    Ok(())
  }

  pub fn list_secret_references(&self, scope: &Scope) -> Vec<SecretReference> {
    self
      .scopes
      .secret_references
      .iter()
      .filter(|r| &r.scope == scope)
      .cloned()
      .collect()
  }

  pub fn add_secret_reference(&mut self, reference: SecretReference) -> Result<(), StoreError> {
    let replaced_id = self
      .scopes
      .secret_references
      .iter()
      .find(|r| r.name == reference.name && r.scope == reference.scope)
      .map(|r| r.id.clone());

    if let Scope::Pipeline(id) = &reference.scope {
      let pipeline = self.get_mut(id)?;
      if let Some(old) = &replaced_id {
        pipeline.secret_refs.retain(|r| r != old);
      }
      if !pipeline.secret_refs.contains(&reference.id) {
        pipeline.secret_refs.push(reference.id.clone());
      }
      pipeline.updated_at = Utc::now();
    }

    let references = &mut self.scopes.secret_references;
    match references
      .iter_mut()
      .find(|r| r.name == reference.name && r.scope == reference.scope)
    {
      Some(existing) => *existing = reference,
      None => references.push(reference),
    }
    Ok(())
  }

  pub fn remove_secret_reference(&mut self, scope: &Scope, name: &str) -> Result<(), StoreError> {
    let position = self
      .scopes
      .secret_references
      .iter()
      .position(|r| r.name == name && &r.scope == scope)
      .ok_or_else(|| StoreError::NotFound(format!("secret reference {name} in {scope}")))?;
    let removed = self.scopes.secret_references.remove(position);

    if let Scope::Pipeline(id) = scope
      && let Some(pipeline) = self.pipelines.get_mut(id)
    {
      pipeline.secret_refs.retain(|r| r != &removed.id);
      pipeline.updated_at = Utc::now();
    }
    Ok(())
  }
}
