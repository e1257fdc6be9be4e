use async_trait::async_trait;
use pipewright_config::{Pipeline, Scope, SecretReference, Variable};
use tokio::sync::RwLock;

use crate::catalog::Catalog;
use crate::error::StoreError;
use crate::{PipelineStore, VariableStore};

/// In-memory store.
///
/// Suitable for tests and for embedding where persistence is handled
/// elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryStore {
  catalog: RwLock<Catalog>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl PipelineStore for InMemoryStore {
  async fn create(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError> {
    self.catalog.write().await.create(pipeline)
  }

  async fn get(&self, pipeline_id: &str) -> Result<Pipeline, StoreError> {
    self.catalog.read().await.get(pipeline_id).cloned()
  }

  async fn update(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError> {
    self.catalog.write().await.update(pipeline)
  }

  async fn delete(&self, pipeline_id: &str) -> Result<(), StoreError> {
    self.catalog.write().await.delete(pipeline_id)
  }

  async fn list(&self, project_id: Option<&str>) -> Result<Vec<Pipeline>, StoreError> {
    Ok(self.catalog.read().await.list(project_id))
  }
}

#[async_trait]
impl VariableStore for InMemoryStore {
  async fn list_variables(&self, scope: &Scope) -> Result<Vec<Variable>, StoreError> {
    self.catalog.read().await.list_variables(scope)
  }

  async fn set_variable(&self, variable: Variable) -> Result<(), StoreError> {
    self.catalog.write().await.set_variable(variable)
  }

  async fn delete_variable(&self, scope: &Scope, name: &str) -> Result<(), StoreError> {
    self.catalog.write().await.delete_variable(scope, name)
  }

  async fn list_secret_references(
    &self,
    scope: &Scope,
  ) -> Result<Vec<SecretReference>, StoreError> {
    Ok(self.catalog.read().await.list_secret_references(scope))
  }

  async fn add_secret_reference(&self, reference: SecretReference) -> Result<(), StoreError> {
    self.catalog.write().await.add_secret_reference(reference)
  }

  async fn remove_secret_reference(&self, scope: &Scope, name: &str) -> Result<(), StoreError> {
    self.catalog.write().await.remove_secret_reference(scope, name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pipewright_config::{ExecutionKind, Step, VariableValue};

  fn make_pipeline(project_id: &str, name: &str) -> Pipeline {
    let mut pipeline = Pipeline::new(project_id, name);
    pipeline.steps = vec![
      Step::new("install", "Install", ExecutionKind::Sdk),
      Step::new("test", "Test", ExecutionKind::Sdk).depends_on(["install"]),
    ];
    pipeline
  }

  #[tokio::test]
  async fn test_pipeline_crud() {
    let store = InMemoryStore::new();
    let pipeline = store.create(make_pipeline("proj", "CI")).await.unwrap();

    let loaded = store.get(&pipeline.id).await.unwrap();
    assert_eq!(loaded.name, "CI");

    let mut edited = loaded.clone();
    edited.description = "runs on push".to_string();
    let updated = store.update(edited).await.unwrap();
    assert_eq!(updated.description, "runs on push");
    assert_eq!(updated.created_at, pipeline.created_at);
    assert!(updated.updated_at >= pipeline.updated_at);

    store.delete(&pipeline.id).await.unwrap();
    assert!(matches!(
      store.get(&pipeline.id).await,
      Err(StoreError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_create_rejects_existing_id() {
    let store = InMemoryStore::new();
    let pipeline = store.create(make_pipeline("proj", "CI")).await.unwrap();

    let result = store.create(pipeline).await;
    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
  }

  #[tokio::test]
  async fn test_list_filters_by_project() {
    let store = InMemoryStore::new();
    store.create(make_pipeline("a", "one")).await.unwrap();
    store.create(make_pipeline("a", "two")).await.unwrap();
    store.create(make_pipeline("b", "three")).await.unwrap();

    assert_eq!(store.list(Some("a")).await.unwrap().len(), 2);
    assert_eq!(store.list(None).await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_duplicate_and_enable() {
    let store = InMemoryStore::new();
    let pipeline = store.create(make_pipeline("proj", "CI")).await.unwrap();
    store
      .set_variable(Variable::new(
        "NODE_ENV",
        "test",
        Scope::pipeline(&pipeline.id),
      ))
      .await
      .unwrap();

    let copy = store.duplicate(&pipeline.id).await.unwrap();
    assert_ne!(copy.id, pipeline.id);
    assert_eq!(copy.name, "CI (copy)");
    assert_eq!(copy.steps.len(), 2);
    assert_eq!(copy.variables[0].scope, Scope::pipeline(&copy.id));

    let disabled = store.set_enabled(&copy.id, false).await.unwrap();
    assert!(!disabled.enabled);
    assert!(store.get(&pipeline.id).await.unwrap().enabled);
  }

  #[tokio::test]
  async fn test_variables_per_scope() {
    let store = InMemoryStore::new();
    let pipeline = store.create(make_pipeline("proj", "CI")).await.unwrap();
    let project = Scope::project("proj");
    let pipe = Scope::pipeline(&pipeline.id);

    store
      .set_variable(Variable::new("REGION", "eu", project.clone()))
      .await
      .unwrap();
    store
      .set_variable(Variable::new("REGION", "us", project.clone()))
      .await
      .unwrap();
    store
      .set_variable(Variable::new("DEBUG", true, pipe.clone()))
      .await
      .unwrap();

    let project_vars = store.list_variables(&project).await.unwrap();
    assert_eq!(project_vars.len(), 1);
    assert_eq!(project_vars[0].value, VariableValue::from("us"));

    let pipeline_vars = store.list_variables(&pipe).await.unwrap();
    assert_eq!(pipeline_vars.len(), 1);
    assert_eq!(store.get(&pipeline.id).await.unwrap().variables.len(), 1);

    store.delete_variable(&pipe, "DEBUG").await.unwrap();
    assert!(store.list_variables(&pipe).await.unwrap().is_empty());
    assert!(matches!(
      store.delete_variable(&pipe, "DEBUG").await,
      Err(StoreError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_pipeline_scope_requires_pipeline() {
    let store = InMemoryStore::new();
    let result = store
      .set_variable(Variable::new("X", "1", Scope::pipeline("missing")))
      .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
  }

  #[tokio::test]
  async fn test_secret_references_track_pipeline() {
    let store = InMemoryStore::new();
    let pipeline = store.create(make_pipeline("proj", "CI")).await.unwrap();
    let scope = Scope::pipeline(&pipeline.id);

    store
      .add_secret_reference(SecretReference::new("vault/npm", "NPM_TOKEN", scope.clone()))
      .await
      .unwrap();
    assert_eq!(
      store.get(&pipeline.id).await.unwrap().secret_refs,
      vec!["vault/npm".to_string()]
    );

    store
      .add_secret_reference(SecretReference::new("vault/npm-2", "NPM_TOKEN", scope.clone()))
      .await
      .unwrap();
    assert_eq!(store.list_secret_references(&scope).await.unwrap().len(), 1);
    assert_eq!(
      store.get(&pipeline.id).await.unwrap().secret_refs,
      vec!["vault/npm-2".to_string()]
    );

    store
      .remove_secret_reference(&scope, "NPM_TOKEN")
      .await
      .unwrap();
    assert!(store.get(&pipeline.id).await.unwrap().secret_refs.is_empty());
  }

  #[tokio::test]
  async fn test_delete_pipeline_drops_its_secret_references() {
    let store = InMemoryStore::new();
    let pipeline = store.create(make_pipeline("proj", "CI")).await.unwrap();
    let scope = Scope::pipeline(&pipeline.id);
    store
      .add_secret_reference(SecretReference::new("vault/a", "A", scope.clone()))
      .await
      .unwrap();

    store.delete(&pipeline.id).await.unwrap();
    assert!(store.list_secret_references(&scope).await.unwrap().is_empty());
  }
}
