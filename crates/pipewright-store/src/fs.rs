use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipewright_config::{Pipeline, Scope, SecretReference, Variable};
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::catalog::{Catalog, Scopes};
use crate::error::StoreError;
use crate::{PipelineStore, VariableStore};

/// Filesystem-based store.
///
/// Records are stored as JSON:
/// ```text
/// {root}/
/// ├── pipelines/
/// │   └── {pipeline_id}.json
/// └── scopes.json   (project variables + secret references)
/// ```
///
/// The whole catalog is loaded on [`FsStore::open`]. A mutation is applied to
/// a copy of the catalog, written through while the catalog lock is held, and
/// only swapped in once every file is on disk. A failed write leaves both
/// memory and disk as they were.
pub struct FsStore {
  root: PathBuf,
  catalog: Mutex<Catalog>,
}

/// Pipeline ids name files, so only `[A-Za-z0-9_-]` is accepted.
fn is_valid_id(pipeline_id: &str) -> bool {
  !pipeline_id.is_empty()
    && pipeline_id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FsStore {
  /// Open (or initialize) a store rooted at `root`.
  pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    fs::create_dir_all(root.join("pipelines")).await?;

    let mut catalog = Catalog::default();

    let mut entries = fs::read_dir(root.join("pipelines")).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      let pipeline = match fs::read_to_string(&path).await {
        Ok(content) => serde_json::from_str::<Pipeline>(&content).map_err(StoreError::from),
        Err(e) => Err(e.into()),
      };
      match pipeline {
        Ok(pipeline) if is_valid_id(&pipeline.id) => {
          catalog.pipelines.insert(pipeline.id.clone(), pipeline);
        }
        Ok(pipeline) => {
          warn!(path = %path.display(), id = %pipeline.id, "skipping pipeline with invalid id");
        }
        Err(e) => {
          warn!(path = %path.display(), error = %e, "skipping unreadable pipeline file");
        }
      }
    }

    let scopes_path = root.join("scopes.json");
    if fs::try_exists(&scopes_path).await? {
      let content = fs::read_to_string(&scopes_path).await?;
      catalog.scopes = serde_json::from_str::<Scopes>(&content)?;
    }

    Ok(Self {
      root,
      catalog: Mutex::new(catalog),
    })
  }

  /// Get the root directory of the store.
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn pipeline_path(&self, pipeline_id: &str) -> Result<PathBuf, StoreError> {
    if !is_valid_id(pipeline_id) {
      return Err(StoreError::InvalidId(pipeline_id.to_string()));
    }
    Ok(self.root.join("pipelines").join(format!("{pipeline_id}.json")))
  }

  /// Write `value` next to `path` and rename it into place.
  async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
      fs::remove_file(&tmp).await.ok();
      return Err(e.into());
    }
    Ok(())
  }

  async fn write_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
    let path = self.pipeline_path(&pipeline.id)?;
    self.write_json(&path, pipeline).await
  }

  async fn write_scopes(&self, scopes: &Scopes) -> Result<(), StoreError> {
    self.write_json(&self.root.join("scopes.json"), scopes).await
  }

  async fn restore_scopes(&self, scopes: &Scopes) {
    if let Err(e) = self.write_scopes(scopes).await {
      warn!(error = %e, "failed to restore scopes.json");
    }
  }

  /// Persist `next` for everything a change to `scope` touches: `scopes.json`
  /// and, for a pipeline scope, the owning pipeline. If the pipeline write
  /// fails, `scopes.json` is rewritten from `previous`.
  async fn write_scope(
    &self,
    previous: &Catalog,
    next: &Catalog,
    scope: &Scope,
  ) -> Result<(), StoreError> {
    self.write_scopes(&next.scopes).await?;
    if let Scope::Pipeline(id) = scope
      && let Err(e) = self.write_pipeline(next.get(id)?).await
    {
      self.restore_scopes(&previous.scopes).await;
      return Err(e);
    }
    Ok(())
  }
}

#[async_trait]
impl PipelineStore for FsStore {
  async fn create(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError> {
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    let created = next.create(pipeline)?;
    self.write_pipeline(&created).await?;
    *catalog = next;
    Ok(created)
  }

  async fn get(&self, pipeline_id: &str) -> Result<Pipeline, StoreError> {
    self.catalog.lock().await.get(pipeline_id).cloned()
  }

  async fn update(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError> {
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    let updated = next.update(pipeline)?;
    self.write_pipeline(&updated).await?;
    *catalog = next;
    Ok(updated)
  }

  async fn delete(&self, pipeline_id: &str) -> Result<(), StoreError> {
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    next.delete(pipeline_id)?;
    let path = self.pipeline_path(pipeline_id)?;

    self.write_scopes(&next.scopes).await?;
    match fs::remove_file(&path).await {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => {
        self.restore_scopes(&catalog.scopes).await;
        return Err(e.into());
      }
    }
    *catalog = next;
    Ok(())
  }

  async fn list(&self, project_id: Option<&str>) -> Result<Vec<Pipeline>, StoreError> {
    Ok(self.catalog.lock().await.list(project_id))
  }
}

#[async_trait]
impl VariableStore for FsStore {
  async fn list_variables(&self, scope: &Scope) -> Result<Vec<Variable>, StoreError> {
    self.catalog.lock().await.list_variables(scope)
  }

  async fn set_variable(&self, variable: Variable) -> Result<(), StoreError> {
    let scope = variable.scope.clone();
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    next.set_variable(variable)?;
    self.write_scope(&catalog, &next, &scope).await?;
    *catalog = next;
    Ok(())
  }

  async fn delete_variable(&self, scope: &Scope, name: &str) -> Result<(), StoreError> {
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    next.delete_variable(scope, name)?;
    self.write_scope(&catalog, &next, scope).await?;
    *catalog = next;
    Ok(())
  }

  async fn list_secret_references(
    &self,
    scope: &Scope,
  ) -> Result<Vec<SecretReference>, StoreError> {
    Ok(self.catalog.lock().await.list_secret_references(scope))
  }

  async fn add_secret_reference(&self, reference: SecretReference) -> Result<(), StoreError> {
    let scope = reference.scope.clone();
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    next.add_secret_reference(reference)?;
    self.write_scope(&catalog, &next, &scope).await?;
    *catalog = next;
    Ok(())
  }

  async fn remove_secret_reference(&self, scope: &Scope, name: &str) -> Result<(), StoreError> {
    let mut catalog = self.catalog.lock().await;
    let mut next = catalog.clone();
    next.remove_secret_reference(scope, name)?;
    self.write_scope(&catalog, &next, scope).await?;
    *catalog = next;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pipewright_config::{ExecutionKind, Step};

  #[tokio::test]
  async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let pipeline_id = {
      let store = FsStore::open(dir.path()).await.unwrap();
      let mut pipeline = Pipeline::new("proj", "Release");
      pipeline.steps = vec![Step::new("build", "Build", ExecutionKind::Docker)];
      let pipeline = store.create(pipeline).await.unwrap();

      store
        .set_variable(Variable::new("REGION", "eu", Scope::project("proj")))
        .await
        .unwrap();
      store
        .set_variable(Variable::new("TAG", "latest", Scope::pipeline(&pipeline.id)))
        .await
        .unwrap();
      store
        .add_secret_reference(SecretReference::new(
          "vault/registry",
          "REGISTRY_TOKEN",
          Scope::pipeline(&pipeline.id),
        ))
        .await
        .unwrap();
      pipeline.id
    };

    let store = FsStore::open(dir.path()).await.unwrap();
    let pipeline = store.get(&pipeline_id).await.unwrap();
    assert_eq!(pipeline.name, "Release");
    assert_eq!(pipeline.variables.len(), 1);
    assert_eq!(pipeline.secret_refs, vec!["vault/registry".to_string()]);
    assert_eq!(
      store
        .list_variables(&Scope::project("proj"))
        .await
        .unwrap()
        .len(),
      1
    );
    assert_eq!(
      store
        .list_secret_references(&Scope::pipeline(&pipeline_id))
        .await
        .unwrap()[0]
        .name,
      "REGISTRY_TOKEN"
    );
  }

  #[tokio::test]
  async fn test_delete_removes_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).await.unwrap();
    let pipeline = store.create(Pipeline::new("proj", "CI")).await.unwrap();
    let path = store.pipeline_path(&pipeline.id).unwrap();
    assert!(path.exists());

    store.delete(&pipeline.id).await.unwrap();
    assert!(!path.exists());
    assert!(store.list(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_open_skips_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("pipelines")).unwrap();
    std::fs::write(dir.path().join("pipelines").join("broken.json"), "{").unwrap();

    let store = FsStore::open(dir.path()).await.unwrap();
    assert!(store.list(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_rejects_ids_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    let store = FsStore::open(&root).await.unwrap();

    for id in ["../../x", "a/b", "..", "", "a\\b"] {
      let mut pipeline = Pipeline::new("proj", "CI");
      pipeline.id = id.to_string();
      assert!(
        matches!(store.create(pipeline).await, Err(StoreError::InvalidId(i)) if i == id),
        "create accepted {id:?}"
      );
      assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
    }
    assert!(!dir.path().join("x.json").exists());
    assert!(store.list(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_create_leaves_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).await.unwrap();
    let pipeline = Pipeline::new("proj", "CI");
    let path = store.pipeline_path(&pipeline.id).unwrap();

    // A directory in the way makes the final rename fail.
    std::fs::create_dir(&path).unwrap();
    assert!(matches!(
      store.create(pipeline.clone()).await,
      Err(StoreError::Io(_))
    ));
    assert!(matches!(
      store.get(&pipeline.id).await,
      Err(StoreError::NotFound(_))
    ));

    std::fs::remove_dir(&path).unwrap();
    store.create(pipeline.clone()).await.unwrap();
    assert!(path.is_file());
  }

  #[tokio::test]
  async fn test_failed_delete_keeps_memory_and_disk_in_sync() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).await.unwrap();
    let pipeline = store.create(Pipeline::new("proj", "CI")).await.unwrap();
    let scope = Scope::pipeline(&pipeline.id);
    store
      .add_secret_reference(SecretReference::new("vault/token", "TOKEN", scope.clone()))
      .await
      .unwrap();

    let path = store.pipeline_path(&pipeline.id).unwrap();
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), "").unwrap();

    assert!(matches!(
      store.delete(&pipeline.id).await,
      Err(StoreError::Io(_))
    ));
    assert!(store.get(&pipeline.id).await.is_ok());
    assert_eq!(store.list_secret_references(&scope).await.unwrap().len(), 1);

    let reopened = FsStore::open(dir.path()).await.unwrap();
    assert_eq!(reopened.list_secret_references(&scope).await.unwrap().len(), 1);
  }
}
