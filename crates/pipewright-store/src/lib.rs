//! Pipewright Store
//!
//! This crate provides the storage traits and implementations for pipeline
//! definitions and the variables and secret references scoped to projects
//! and pipelines, plus the record types describing a pipeline execution.
//!
//! - [`PipelineStore`]: create, read, update, delete, duplicate, enable/disable
//! - [`VariableStore`]: variable and secret-reference CRUD per [`Scope`]
//!
//! Two implementations are provided: [`InMemoryStore`] for tests and
//! embedding, and [`FsStore`] which persists JSON files under a root
//! directory.
//!
//! [`Scope`]: pipewright_config::Scope

mod catalog;
mod error;
mod fs;
mod memory;
mod types;

pub use error::StoreError;
pub use fs::FsStore;
pub use memory::InMemoryStore;
pub use types::{ExecutionStatus, PipelineExecution, StepExecution, StepStatus};

use async_trait::async_trait;
use chrono::Utc;
use pipewright_config::{Pipeline, Scope, SecretReference, Variable};

/// Storage trait for pipeline definitions.
#[async_trait]
pub trait PipelineStore: Send + Sync {
  /// Store a new pipeline. Fails if the id is already taken.
  async fn create(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError>;

  /// Get a pipeline by id.
  async fn get(&self, pipeline_id: &str) -> Result<Pipeline, StoreError>;

  /// Replace an existing pipeline. Bumps `updated_at`.
  async fn update(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError>;

  /// Delete a pipeline and the secret references scoped to it.
  async fn delete(&self, pipeline_id: &str) -> Result<(), StoreError>;

  /// List pipelines, optionally restricted to one project, oldest first.
  async fn list(&self, project_id: Option<&str>) -> Result<Vec<Pipeline>, StoreError>;

  /// Copy a pipeline under a fresh id.
  async fn duplicate(&self, pipeline_id: &str) -> Result<Pipeline, StoreError> {
    let source = self.get(pipeline_id).await?;
    let now = Utc::now();

    let mut copy = source.clone();
    copy.id = uuid::Uuid::new_v4().to_string();
    copy.name = format!("{} (copy)", source.name);
    copy.created_at = now;
    copy.updated_at = now;
    for variable in &mut copy.variables {
      variable.scope = Scope::Pipeline(copy.id.clone());
    }
    copy.secret_refs.clear();

    self.create(copy).await
  }

  /// Enable or disable a pipeline.
  async fn set_enabled(&self, pipeline_id: &str, enabled: bool) -> Result<Pipeline, StoreError> {
    let mut pipeline = self.get(pipeline_id).await?;
    pipeline.enabled = enabled;
    self.update(pipeline).await
  }
}

/// Storage trait for variables and secret references.
///
/// Names are unique within a scope; setting an existing name replaces it.
#[async_trait]
pub trait VariableStore: Send + Sync {
  async fn list_variables(&self, scope: &Scope) -> Result<Vec<Variable>, StoreError>;

  async fn set_variable(&self, variable: Variable) -> Result<(), StoreError>;

  async fn delete_variable(&self, scope: &Scope, name: &str) -> Result<(), StoreError>;

  async fn list_secret_references(&self, scope: &Scope)
  -> Result<Vec<SecretReference>, StoreError>;

  async fn add_secret_reference(&self, reference: SecretReference) -> Result<(), StoreError>;

  async fn remove_secret_reference(&self, scope: &Scope, name: &str) -> Result<(), StoreError>;
}
