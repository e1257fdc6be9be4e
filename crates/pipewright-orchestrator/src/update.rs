use chrono::{DateTime, Utc};
use pipewright_store::{ExecutionStatus, StepStatus};
use serde::{Deserialize, Serialize};

/// Who produced a status update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
  /// Reported by the remote executor.
  #[default]
  Executor,
  /// Derived by the orchestrator: skips, local cancellation, timeouts,
  /// retries and finalization.
  Orchestrator,
}

/// A status change for a step, or for a whole execution when `step_id` is
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
  pub execution_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_id: Option<String>,
  pub status: StepStatus,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub log_ref: Option<String>,
  /// Failure reason, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default)]
  pub source: UpdateSource,
}

impl StatusUpdate {
  /// An executor update for one step.
  pub fn step(execution_id: impl Into<String>, step_id: impl Into<String>, status: StepStatus) -> Self {
    Self {
      execution_id: execution_id.into(),
      step_id: Some(step_id.into()),
      status,
      timestamp: Utc::now(),
      log_ref: None,
      message: None,
      source: UpdateSource::Executor,
    }
  }

  /// An executor update for the whole execution.
  pub fn pipeline(execution_id: impl Into<String>, status: StepStatus) -> Self {
    Self {
      execution_id: execution_id.into(),
      step_id: None,
      status,
      timestamp: Utc::now(),
      log_ref: None,
      message: None,
      source: UpdateSource::Executor,
    }
  }

  pub fn with_log_ref(mut self, log_ref: impl Into<String>) -> Self {
    self.log_ref = Some(log_ref.into());
    self
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  pub(crate) fn derived(mut self) -> Self {
    self.source = UpdateSource::Orchestrator;
    self
  }

  /// Whether this is a terminal update for the whole execution.
  pub fn is_final(&self) -> bool {
    self.step_id.is_none() && self.status.is_terminal()
  }
}

/// Pipeline-level updates reuse the step status vocabulary.
pub(crate) fn execution_status_as_step(status: ExecutionStatus) -> StepStatus {
  match status {
    ExecutionStatus::Pending => StepStatus::Pending,
    ExecutionStatus::Running => StepStatus::Running,
    ExecutionStatus::Succeeded => StepStatus::Succeeded,
    ExecutionStatus::Failed => StepStatus::Failed,
    ExecutionStatus::Cancelled => StepStatus::Cancelled,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_update_serde() {
    let update = StatusUpdate::step("exec-1", "build", StepStatus::Failed).with_message("exit 1");
    let json = serde_json::to_value(&update).unwrap();
    assert_eq!(json["step_id"], "build");
    assert_eq!(json["status"], "failed");
    assert_eq!(json["source"], "executor");
    assert!(json.get("log_ref").is_none());

    let back: StatusUpdate = serde_json::from_value(json).unwrap();
    assert_eq!(back, update);
  }

  #[test]
  fn test_source_defaults_to_executor() {
    let json = serde_json::json!({
      "execution_id": "exec-1",
      "status": "running",
      "timestamp": "2026-01-01T00:00:00Z"
    });
    let update: StatusUpdate = serde_json::from_value(json).unwrap();
    assert_eq!(update.source, UpdateSource::Executor);
    assert!(update.step_id.is_none());
    assert!(!update.is_final());
  }
}
