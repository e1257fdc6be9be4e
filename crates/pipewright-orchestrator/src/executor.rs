use async_trait::async_trait;
use pipewright_config::{StepConfig, StepKind};
use pipewright_resolver::ResolvedEnv;
use pipewright_workflow::ExecutionPlan;
use serde::Serialize;

use crate::error::ExecutorError;

/// A step as handed to the executor.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedStep {
  pub id: String,
  pub kind: StepKind,
  pub config: StepConfig,
  pub depends_on: Vec<String>,
}

/// Everything the executor needs to run a pipeline.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
  pub pipeline_id: String,
  pub plan: ExecutionPlan,
  pub steps: Vec<SubmittedStep>,
  pub env: ResolvedEnv,
  pub working_directory: String,
}

/// A request to run a failed step again, along with the skipped dependents
/// that were requeued with it.
#[derive(Debug, Clone)]
pub struct RetryRequest {
  pub execution_id: String,
  pub step_id: String,
  /// Requeued dependents in declaration order. Does not include `step_id`.
  pub requeued: Vec<String>,
  /// Environment resolved when the execution was submitted.
  pub env: ResolvedEnv,
}

/// The remote side that actually runs steps.
///
/// Outcomes are not returned from these calls: the executor reports them
/// asynchronously as [`StatusUpdate`](crate::StatusUpdate)s.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
  /// Submit a run and return the execution id the executor assigned.
  async fn submit(&self, request: &SubmitRequest) -> Result<String, ExecutorError>;

  /// Ask the executor to stop an execution. Running steps report
  /// `cancelled` once they have actually stopped.
  async fn cancel(&self, execution_id: &str) -> Result<(), ExecutorError>;

  /// Run a failed step (and its requeued dependents) again.
  async fn retry_step(&self, request: &RetryRequest) -> Result<(), ExecutorError>;
}
