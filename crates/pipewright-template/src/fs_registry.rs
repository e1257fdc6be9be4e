use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};

use crate::builtin::{builtin, builtin_templates, is_builtin};
use crate::error::{ImportError, TemplateError};
use crate::registry::TemplateRegistry;
use crate::slug::slugify;
use crate::template::Template;

/// A user template key is stored as a file name, so only slugs are accepted.
fn is_valid_key(key: &str) -> bool {
  slugify(key).is_some_and(|slug| slug == key)
}

/// Filesystem-backed template registry.
///
/// Built-in templates are served from memory. User templates are stored one
/// file per key:
/// ```text
/// {root}/
/// ├── my-service.json
/// └── nightly-release.json
/// ```
pub struct FsTemplateRegistry {
  root: PathBuf,
}

impl FsTemplateRegistry {
  /// Create a new registry at the given root path.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Get the root directory of the registry.
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn template_path(&self, key: &str) -> Result<PathBuf, TemplateError> {
    if !is_valid_key(key) {
      return Err(TemplateError::InvalidKey(key.to_string()));
    }
    Ok(self.root.join(format!("{key}.json")))
  }

  async fn read_template(&self, path: &Path) -> Result<Template, TemplateError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
  }

  async fn write_template(&self, path: &Path, template: &Template) -> Result<(), std::io::Error> {
    fs::create_dir_all(&self.root).await?;
    let content = serde_json::to_string_pretty(template)?;
    fs::write(path, content).await
  }

  async fn user_templates(&self) -> Result<Vec<Template>, TemplateError> {
    let mut templates = Vec::new();

    if !fs::try_exists(&self.root).await? {
      return Ok(templates);
    }

    let mut entries = fs::read_dir(&self.root).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().is_none_or(|ext| ext != "json") {
        continue;
      }
      match self.read_template(&path).await {
        Ok(template) => templates.push(template),
        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable template"),
      }
    }

    templates.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(templates)
  }
}

#[async_trait]
impl TemplateRegistry for FsTemplateRegistry {
  async fn list(&self) -> Result<Vec<Template>, TemplateError> {
    let mut templates = builtin_templates();
    templates.extend(self.user_templates().await?);
    Ok(templates)
  }

  async fn get(&self, key: &str) -> Result<Template, TemplateError> {
    if let Some(template) = builtin(key) {
      return Ok(template);
    }

    let path = self.template_path(key)?;
    if !fs::try_exists(&path).await? {
      return Err(TemplateError::NotFound(key.to_string()));
    }
    self.read_template(&path).await
  }

  async fn save(&self, mut template: Template) -> Result<Template, TemplateError> {
    if is_builtin(&template.key) {
      return Err(TemplateError::Builtin(template.key));
    }
    let path = self.template_path(&template.key)?;
    template.check_references()?;
    if template.id.is_none() {
      template.id = Some(uuid::Uuid::new_v4().to_string());
    }

    self.write_template(&path, &template).await?;
    info!(key = %template.key, "saved template");
    Ok(template)
  }

  async fn delete(&self, key: &str) -> Result<(), TemplateError> {
    if is_builtin(key) {
      return Err(TemplateError::Builtin(key.to_string()));
    }

    let path = self.template_path(key)?;
    if !fs::try_exists(&path).await? {
      return Err(TemplateError::NotFound(key.to_string()));
    }
    fs::remove_file(&path).await?;
    info!(key = %key, "deleted template");
    Ok(())
  }

  async fn import(&self, json: &str) -> Result<Template, ImportError> {
    let mut template: Template = serde_json::from_str(json)?;

    if is_builtin(&template.key) {
      return Err(ImportError::BuiltinConflict(template.key));
    }
    let Ok(path) = self.template_path(&template.key) else {
      return Err(ImportError::InvalidKey(template.key));
    };
    if fs::try_exists(&path).await? {
      return Err(ImportError::AlreadyExists(template.key));
    }
    template.check_references().map_err(ImportError::Invalid)?;

    template.id = Some(uuid::Uuid::new_v4().to_string());
    self.write_template(&path, &template).await?;
    info!(key = %template.key, "imported template");
    Ok(template)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::template::TemplateStep;

  fn make_template(key: &str) -> Template {
    let mut template = Template::new(key, "My Service", "deploys the service");
    template.steps = vec![
      TemplateStep::new("a", "A").command("make a"),
      TemplateStep::new("b", "B").depends_on(["a"]),
    ];
    template
  }

  #[tokio::test]
  async fn test_list_without_root_dir() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsTemplateRegistry::new(dir.path().join("templates"));

    let templates = registry.list().await.unwrap();
    assert_eq!(templates.len(), builtin_templates().len());
  }

  #[tokio::test]
  async fn test_save_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsTemplateRegistry::new(dir.path());

    let saved = registry.save(make_template("svc")).await.unwrap();
    assert!(saved.id.is_some());
    assert!(dir.path().join("svc.json").exists());

    let loaded = registry.get("svc").await.unwrap();
    assert_eq!(loaded, saved);

    let keys: Vec<String> = registry.list().await.unwrap().into_iter().map(|t| t.key).collect();
    assert_eq!(keys.last().map(String::as_str), Some("svc"));

    registry.delete("svc").await.unwrap();
    assert!(matches!(
      registry.get("svc").await,
      Err(TemplateError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_builtins_are_immutable() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsTemplateRegistry::new(dir.path());

    assert!(matches!(
      registry.save(make_template("node")).await,
      Err(TemplateError::Builtin(_))
    ));
    assert!(matches!(
      registry.delete("rust").await,
      Err(TemplateError::Builtin(_))
    ));
  }

  #[tokio::test]
  async fn test_save_rejects_dangling_reference() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsTemplateRegistry::new(dir.path());

    let mut template = make_template("svc");
    template.steps[1].depends_on = vec!["zzz".to_string()];
    assert!(matches!(
      registry.save(template).await,
      Err(TemplateError::DanglingDependency { .. })
    ));
  }

  #[tokio::test]
  async fn test_rejects_keys_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("templates");
    let registry = FsTemplateRegistry::new(&root);

    for key in ["../escaped", "nested/svc", "..", "", "Svc", "a\\b"] {
      assert!(
        matches!(
          registry.save(make_template(key)).await,
          Err(TemplateError::InvalidKey(k)) if k == key
        ),
        "save accepted {key:?}"
      );
      assert!(matches!(
        registry.get(key).await,
        Err(TemplateError::InvalidKey(_))
      ));
      assert!(matches!(
        registry.delete(key).await,
        Err(TemplateError::InvalidKey(_))
      ));
    }
    assert!(!dir.path().join("escaped.json").exists());
    assert!(!root.exists());
  }

  #[tokio::test]
  async fn test_skips_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    let registry = FsTemplateRegistry::new(dir.path());
    registry.save(make_template("svc")).await.unwrap();
    std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let templates = registry.list().await.unwrap();
    assert_eq!(templates.len(), builtin_templates().len() + 1);
  }
}
