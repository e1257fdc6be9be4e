//! Pipewright Template
//!
//! Reusable, parameterized step lists that expand into concrete pipelines.
//!
//! Template steps declare a local `key`; [`generate`] maps every key to a
//! generated step id before rewriting any `depends_on` list, so generated
//! dependencies always point at generated ids. Built-in templates ship with
//! the crate and can never be overwritten. User templates live in a
//! [`TemplateRegistry`] and round-trip through JSON.

mod builtin;
mod error;
mod fs_registry;
mod generate;
mod registry;
mod slug;
mod template;

pub use builtin::{builtin, builtin_templates, is_builtin};
pub use error::{ImportError, TemplateError};
pub use fs_registry::FsTemplateRegistry;
pub use generate::{Customizations, generate};
pub use registry::TemplateRegistry;
pub use slug::slugify;
pub use template::{Template, TemplateStep, TemplateVariable};
