use std::sync::Arc;

use async_trait::async_trait;
use pipewright_config::Scope;
use pipewright_store::VariableStore;
use tracing::{debug, warn};

use crate::env::ResolvedEnv;
use crate::error::ResolveError;
use crate::vault::SecretVault;

/// Resolver turns a scope's variables and secret references into values.
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Resolve a single name within `scope`.
  ///
  /// Plain variables are checked first, then secret references by display
  /// name. Returns `None` if neither source has the name or the secret could
  /// not be decrypted.
  async fn resolve(&self, scope: &Scope, name: &str) -> Result<Option<String>, ResolveError>;

  /// Resolve every variable and secret declared for `scope`.
  ///
  /// Variables are applied first and secrets second, so a secret overrides a
  /// variable of the same name. Secrets that fail to decrypt are left out.
  async fn resolve_all(&self, scope: &Scope) -> Result<ResolvedEnv, ResolveError>;
}

/// Standard resolver over a variable store and a secret vault.
///
/// Operates on exactly one scope per call; a pipeline scope does not fall
/// back to its project's scope.
pub struct StandardResolver {
  store: Arc<dyn VariableStore>,
  vault: Arc<dyn SecretVault>,
}

impl StandardResolver {
  /// Create a new resolver.
  pub fn new(store: Arc<dyn VariableStore>, vault: Arc<dyn SecretVault>) -> Self {
    Self { store, vault }
  }

  async fn decrypt(&self, scope: &Scope, name: &str, secret_id: &str) -> Option<String> {
    match self.vault.decrypt(secret_id).await {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(
          scope = %scope,
          variable = %name,
          secret_id = %secret_id,
          error = %e,
          "secret resolution failed, treating as absent"
        );
        None
      }
    }
  }
}

#[async_trait]
impl Resolver for StandardResolver {
  async fn resolve(&self, scope: &Scope, name: &str) -> Result<Option<String>, ResolveError> {
    let variables = self.store.list_variables(scope).await?;
    if let Some(variable) = variables.iter().find(|v| v.name == name) {
      return Ok(Some(variable.value.as_env()));
    }

    let references = self.store.list_secret_references(scope).await?;
    match references.iter().find(|r| r.name == name) {
      Some(reference) => Ok(self.decrypt(scope, name, &reference.id).await),
      None => Ok(None),
    }
  }

  async fn resolve_all(&self, scope: &Scope) -> Result<ResolvedEnv, ResolveError> {
    let variables = self.store.list_variables(scope).await?;
    let references = self.store.list_secret_references(scope).await?;

    let mut env = ResolvedEnv::new();
    for variable in &variables {
      env.insert_plain(variable.name.clone(), variable.value.as_env());
    }

    let decrypted = futures::future::join_all(
      references
        .iter()
        .map(|r| self.decrypt(scope, &r.name, &r.id)),
    )
    .await;

    for (reference, value) in references.iter().zip(decrypted) {
      if let Some(value) = value {
        env.insert_secret(reference.name.clone(), value);
      }
    }

    debug!(
      scope = %scope,
      variables = variables.len(),
      secrets = references.len(),
      resolved = env.len(),
      "resolved scope"
    );

    Ok(env)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pipewright_config::{SecretReference, Variable};
  use pipewright_store::InMemoryStore;

  use crate::vault::InMemoryVault;

  async fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryVault>, StandardResolver) {
    let store = Arc::new(InMemoryStore::new());
    let vault = Arc::new(InMemoryVault::new());
    let resolver = StandardResolver::new(store.clone(), vault.clone());
    (store, vault, resolver)
  }

  #[tokio::test]
  async fn test_secret_wins_over_variable_with_same_name() {
    let (store, vault, resolver) = setup().await;
    let scope = Scope::project("proj");

    store
      .set_variable(Variable::new("API_KEY", "v1", scope.clone()))
      .await
      .unwrap();
    store
      .add_secret_reference(SecretReference::new("vault/api", "API_KEY", scope.clone()))
      .await
      .unwrap();
    vault.insert("vault/api", "v2");

    let env = resolver.resolve_all(&scope).await.unwrap();
    assert_eq!(env.get("API_KEY"), Some("v2"));
    assert!(env.is_secret("API_KEY"));
  }

  #[tokio::test]
  async fn test_resolve_prefers_variable() {
    let (store, vault, resolver) = setup().await;
    let scope = Scope::project("proj");

    store
      .set_variable(Variable::new("API_KEY", "v1", scope.clone()))
      .await
      .unwrap();
    store
      .add_secret_reference(SecretReference::new("vault/api", "API_KEY", scope.clone()))
      .await
      .unwrap();
    vault.insert("vault/api", "v2");

    assert_eq!(
      resolver.resolve(&scope, "API_KEY").await.unwrap(),
      Some("v1".to_string())
    );
  }

  #[tokio::test]
  async fn test_resolve_falls_through_to_secret() {
    let (store, vault, resolver) = setup().await;
    let scope = Scope::project("proj");
    store
      .add_secret_reference(SecretReference::new("vault/db", "DB_PASSWORD", scope.clone()))
      .await
      .unwrap();
    vault.insert("vault/db", "s3cret");

    assert_eq!(
      resolver.resolve(&scope, "DB_PASSWORD").await.unwrap(),
      Some("s3cret".to_string())
    );
    assert_eq!(resolver.resolve(&scope, "MISSING").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_undecryptable_secret_is_absent() {
    let (store, vault, resolver) = setup().await;
    let scope = Scope::project("proj");

    store
      .set_variable(Variable::new("REGION", "eu", scope.clone()))
      .await
      .unwrap();
    store
      .add_secret_reference(SecretReference::new("vault/bad", "BROKEN", scope.clone()))
      .await
      .unwrap();
    store
      .add_secret_reference(SecretReference::new("vault/gone", "GONE", scope.clone()))
      .await
      .unwrap();
    vault.insert_undecryptable("vault/bad");

    assert_eq!(resolver.resolve(&scope, "BROKEN").await.unwrap(), None);

    let env = resolver.resolve_all(&scope).await.unwrap();
    assert_eq!(env.len(), 1);
    assert_eq!(env.get("REGION"), Some("eu"));
    assert_eq!(env.get("BROKEN"), None);
  }

  #[tokio::test]
  async fn test_undecryptable_secret_keeps_variable_value() {
    let (store, vault, resolver) = setup().await;
    let scope = Scope::project("proj");

    store
      .set_variable(Variable::new("TOKEN", "fallback", scope.clone()))
      .await
      .unwrap();
    store
      .add_secret_reference(SecretReference::new("vault/token", "TOKEN", scope.clone()))
      .await
      .unwrap();
    vault.insert_undecryptable("vault/token");

    let env = resolver.resolve_all(&scope).await.unwrap();
    assert_eq!(env.get("TOKEN"), Some("fallback"));
  }

  #[tokio::test]
  async fn test_scopes_are_isolated() {
    let (store, _vault, resolver) = setup().await;
    let pipeline = pipewright_store::PipelineStore::create(
      store.as_ref(),
      pipewright_config::Pipeline::new("proj", "CI"),
    )
    .await
    .unwrap();

    store
      .set_variable(Variable::new("REGION", "eu", Scope::project("proj")))
      .await
      .unwrap();

    let env = resolver
      .resolve_all(&Scope::pipeline(&pipeline.id))
      .await
      .unwrap();
    assert!(env.is_empty());
    assert_eq!(
      resolver
        .resolve(&Scope::pipeline(&pipeline.id), "REGION")
        .await
        .unwrap(),
      None
    );
  }

  #[tokio::test]
  async fn test_missing_pipeline_scope_is_an_error() {
    let (_store, _vault, resolver) = setup().await;
    let result = resolver.resolve_all(&Scope::pipeline("nope")).await;
    assert!(matches!(result, Err(ResolveError::Store(_))));
  }
}
