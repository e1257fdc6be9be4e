use pipewright_workflow::ValidationReport;

/// Errors from template lookup, generation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
  #[error("template not found: {0}")]
  NotFound(String),

  #[error("template {0} is built-in and cannot be modified")]
  Builtin(String),

  /// Keys name files on disk, so they must already be slugs.
  #[error("invalid template key {0:?}: expected lowercase letters, digits and dashes")]
  InvalidKey(String),

  #[error("template {template}: step {step} depends on undeclared key {depends_on}")]
  DanglingDependency {
    template: String,
    step: String,
    depends_on: String,
  },

  #[error("template {template}: step {index} has neither a key nor a name usable as an id")]
  UnnamedStep { template: String, index: usize },

  #[error("template {template}: generated step id {step_id} is not unique")]
  DuplicateStepId { template: String, step_id: String },

  #[error("template {template} generated an invalid pipeline: {report}")]
  InvalidGraph {
    template: String,
    report: ValidationReport,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Errors from importing a template export.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
  /// Not JSON, or missing one of `key`, `name`, `description`, `steps`.
  #[error("malformed template: {0}")]
  Malformed(#[from] serde_json::Error),

  #[error("template key {0} belongs to a built-in template")]
  BuiltinConflict(String),

  #[error("template key {0} already exists")]
  AlreadyExists(String),

  #[error("invalid template key {0:?}: expected lowercase letters, digits and dashes")]
  InvalidKey(String),

  #[error("invalid template: {0}")]
  Invalid(#[source] TemplateError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
