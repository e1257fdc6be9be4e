use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

const REDACTED: &str = "<redacted>";

/// A flat name -> value runtime environment.
///
/// Remembers which names came from secrets so they are never printed:
/// `Debug` and `Serialize` both redact those values. [`ResolvedEnv::get`]
/// and [`ResolvedEnv::values`] are the only ways to read a secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnv {
  values: BTreeMap<String, String>,
  secret_names: BTreeSet<String>,
}

impl ResolvedEnv {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set a plain value. Clears any secret marking for `name`.
  pub fn insert_plain(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    self.secret_names.remove(&name);
    self.values.insert(name, value.into());
  }

  /// Set a secret value.
  pub fn insert_secret(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    self.secret_names.insert(name.clone());
    self.values.insert(name, value.into());
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.values.get(name).map(String::as_str)
  }

  pub fn is_secret(&self, name: &str) -> bool {
    self.secret_names.contains(name)
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }

  /// All values, secrets included. Only hand this to the executor.
  pub fn values(&self) -> &BTreeMap<String, String> {
    &self.values
  }
}

impl ResolvedEnv {
  fn redacted(&self) -> impl Iterator<Item = (&str, &str)> {
    self.values.iter().map(|(name, value)| {
      if self.secret_names.contains(name) {
        (name.as_str(), REDACTED)
      } else {
        (name.as_str(), value.as_str())
      }
    })
  }
}

impl fmt::Debug for ResolvedEnv {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_map().entries(self.redacted()).finish()
  }
}

impl Serialize for ResolvedEnv {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.values.len()))?;
    for (name, value) in self.redacted() {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}
