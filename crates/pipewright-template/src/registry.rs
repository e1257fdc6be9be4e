use async_trait::async_trait;
use pipewright_config::Pipeline;

use crate::error::{ImportError, TemplateError};
use crate::generate::{Customizations, generate};
use crate::template::Template;

/// Registry of built-in and user-defined templates.
#[async_trait]
pub trait TemplateRegistry: Send + Sync {
  /// Built-in templates first, then user templates sorted by key.
  async fn list(&self) -> Result<Vec<Template>, TemplateError>;

  /// Get a template by key.
  async fn get(&self, key: &str) -> Result<Template, TemplateError>;

  /// Create or replace a user template.
  ///
  /// Built-in keys are rejected. A template without an `id` is assigned one.
  async fn save(&self, template: Template) -> Result<Template, TemplateError>;

  /// Delete a user template.
  async fn delete(&self, key: &str) -> Result<(), TemplateError>;

  /// Import a template from its JSON export as a new user template.
  async fn import(&self, json: &str) -> Result<Template, ImportError>;

  /// Export a template as pretty-printed JSON.
  async fn export(&self, key: &str) -> Result<String, TemplateError> {
    let template = self.get(key).await?;
    Ok(serde_json::to_string_pretty(&template)?)
  }

  /// Look up a template by key and expand it into a new pipeline.
  async fn generate(
    &self,
    key: &str,
    project_id: &str,
    project_name: &str,
    customizations: &Customizations,
  ) -> Result<Pipeline, TemplateError> {
    let template = self.get(key).await?;
    generate(&template, project_id, project_name, customizations)
  }
}
