use pipewright_resolver::ResolveError;
use pipewright_store::StoreError;
use pipewright_workflow::ValidationReport;

/// Errors reported by a [`RemoteExecutor`](crate::RemoteExecutor).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
  #[error("request rejected: {0}")]
  Rejected(String),

  #[error("executor unreachable: {0}")]
  Unreachable(String),

  #[error("unknown execution: {0}")]
  UnknownExecution(String),
}

/// Errors from orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  #[error("pipeline not found: {0}")]
  PipelineNotFound(String),

  #[error("pipeline {0} is disabled")]
  PipelineDisabled(String),

  /// The step graph is malformed. Nothing was submitted.
  #[error("invalid pipeline: {0}")]
  Validation(ValidationReport),

  #[error("resolution failed: {0}")]
  Resolution(#[from] ResolveError),

  #[error("failed to render working directory: {0}")]
  WorkingDirectory(#[source] minijinja::Error),

  /// The executor rejected or never received the run. No execution exists.
  #[error("submission failed: {0}")]
  Submission(#[source] ExecutorError),

  #[error("executor call failed: {0}")]
  Executor(#[source] ExecutorError),

  #[error("execution not found: {0}")]
  ExecutionNotFound(String),

  #[error("step {step_id} not found in execution {execution_id}")]
  StepNotFound {
    execution_id: String,
    step_id: String,
  },

  #[error("cannot retry step {step_id}: {reason}")]
  InvalidRetry { step_id: String, reason: String },

  #[error("execution {0} has not finished")]
  ExecutionActive(String),

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}
