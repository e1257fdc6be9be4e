use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a pipeline execution.
///
/// `pending -> running -> {succeeded, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::Pending => "pending",
      ExecutionStatus::Running => "running",
      ExecutionStatus::Succeeded => "succeeded",
      ExecutionStatus::Failed => "failed",
      ExecutionStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status of a single step within an execution.
///
/// `pending -> running -> {succeeded, failed, skipped, cancelled}`. A step
/// is skipped without ever running when a transitive dependency ends in
/// `failed` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped,
  Cancelled,
}

impl StepStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, StepStatus::Pending | StepStatus::Running)
  }

  /// Terminal states that block dependents.
  pub fn blocks_dependents(&self) -> bool {
    matches!(self, StepStatus::Failed | StepStatus::Cancelled)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      StepStatus::Pending => "pending",
      StepStatus::Running => "running",
      StepStatus::Succeeded => "succeeded",
      StepStatus::Failed => "failed",
      StepStatus::Skipped => "skipped",
      StepStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A step's progress within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
  pub step_id: String,
  pub status: StepStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub logs_ref: Option<String>,
  pub retry_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StepExecution {
  pub fn pending(step_id: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      status: StepStatus::Pending,
      logs_ref: None,
      retry_count: 0,
      started_at: None,
      finished_at: None,
      error: None,
    }
  }
}

/// A single run of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
  pub id: String,
  pub pipeline_id: String,
  pub status: ExecutionStatus,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  /// Step records in pipeline declaration order.
  pub steps: Vec<StepExecution>,
}

impl PipelineExecution {
  pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
    self.steps.iter().find(|s| s.step_id == step_id)
  }

  pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
    self.steps.iter_mut().find(|s| s.step_id == step_id)
  }

  pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
    self.step(step_id).map(|s| s.status)
  }

  pub fn all_steps_terminal(&self) -> bool {
    self.steps.iter().all(|s| s.status.is_terminal())
  }
}
