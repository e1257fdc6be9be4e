//! Pipewright Resolver
//!
//! Resolves named values for one [`Scope`] from two sources:
//! - plain variables from a [`VariableStore`]
//! - secret references, decrypted on demand through a [`SecretVault`]
//!
//! When a variable and a secret share a name, the secret wins.
//!
//! [`Scope`]: pipewright_config::Scope
//! [`VariableStore`]: pipewright_store::VariableStore

mod env;
mod error;
mod resolver;
mod vault;

pub use env::ResolvedEnv;
pub use error::{ResolveError, VaultError};
pub use resolver::{Resolver, StandardResolver};
pub use vault::{EnvVault, InMemoryVault, SecretVault};
