//! Per-execution state machine.
//!
//! All transitions for one execution happen here, under the orchestrator's
//! per-execution lock. Every method returns the updates it derived locally
//! so the caller can forward them to subscribers in order.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use pipewright_resolver::ResolvedEnv;
use pipewright_store::{ExecutionStatus, PipelineExecution, StepStatus};
use pipewright_workflow::Graph;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::update::{StatusUpdate, execution_status_as_step};

pub(crate) const TIMED_OUT: &str = "timed out";

pub(crate) struct RunState {
  pub(crate) execution: PipelineExecution,
  pub(crate) env: ResolvedEnv,
  graph: Graph,
  cancel_requested: bool,
  step_timeout: Option<Duration>,
  deadlines: HashMap<String, Instant>,
}

impl RunState {
  pub(crate) fn new(
    execution: PipelineExecution,
    graph: Graph,
    env: ResolvedEnv,
    step_timeout: Option<Duration>,
  ) -> Self {
    Self {
      execution,
      env,
      graph,
      cancel_requested: false,
      step_timeout,
      deadlines: HashMap::new(),
    }
  }

  /// Finalize immediately if there is nothing to run.
  pub(crate) fn start(&mut self) -> Vec<StatusUpdate> {
    let mut derived = Vec::new();
    self.finalize(None, &mut derived);
    derived
  }

  /// Apply an update reported by the executor.
  pub(crate) fn apply(&mut self, update: &StatusUpdate, now: Instant) -> Vec<StatusUpdate> {
    let mut derived = Vec::new();
    let forced = match &update.step_id {
      Some(step_id) => {
        self.apply_step(step_id, update, now, &mut derived);
        None
      }
      None => self.apply_pipeline(update, &mut derived),
    };
    self.finalize(forced, &mut derived);
    derived
  }

  fn apply_step(
    &mut self,
    step_id: &str,
    update: &StatusUpdate,
    now: Instant,
    derived: &mut Vec<StatusUpdate>,
  ) {
    let execution_id = &self.execution.id;
    let Some(step) = self.execution.steps.iter_mut().find(|s| s.step_id == step_id) else {
      warn!(execution_id = %execution_id, step_id = %step_id, "update for unknown step");
      return;
    };

    if step.status.is_terminal() {
      warn!(
        execution_id = %execution_id,
        step_id = %step_id,
        current = %step.status,
        reported = %update.status,
        "ignoring update for finished step"
      );
      return;
    }

    match update.status {
      StepStatus::Pending => {
        debug!(execution_id = %execution_id, step_id = %step_id, "ignoring pending update");
        return;
      }
      StepStatus::Running => {
        if step.status == StepStatus::Running {
          return;
        }
        step.status = StepStatus::Running;
        step.started_at = Some(update.timestamp);
        if update.log_ref.is_some() {
          step.logs_ref = update.log_ref.clone();
        }
        if let Some(timeout) = self.step_timeout {
          self.deadlines.insert(step_id.to_string(), now + timeout);
        }
      }
      status => {
        step.status = status;
        step.finished_at = Some(update.timestamp);
        if update.log_ref.is_some() {
          step.logs_ref = update.log_ref.clone();
        }
        if status == StepStatus::Failed {
          step.error = update.message.clone();
        }
        self.deadlines.remove(step_id);
        if status.blocks_dependents() {
          self.skip_dependents(step_id, derived);
        }
      }
    }

    if self.execution.status == ExecutionStatus::Pending {
      self.execution.status = ExecutionStatus::Running;
    }
  }

  fn apply_pipeline(
    &mut self,
    update: &StatusUpdate,
    derived: &mut Vec<StatusUpdate>,
  ) -> Option<ExecutionStatus> {
    if self.execution.status.is_terminal() {
      return None;
    }

    match update.status {
      StepStatus::Pending => None,
      StepStatus::Running => {
        self.execution.status = ExecutionStatus::Running;
        None
      }
      status => {
        let cancelled = status == StepStatus::Cancelled || self.cancel_requested;
        let unfinished: Vec<(String, StepStatus)> = self
          .execution
          .steps
          .iter()
          .filter(|s| !s.status.is_terminal())
          .map(|s| (s.step_id.clone(), s.status))
          .collect();
        for (step_id, current) in unfinished {
          // never-started steps are skipped, started ones were stopped
          let fill = if cancelled || current == StepStatus::Running {
            StepStatus::Cancelled
          } else {
            StepStatus::Skipped
          };
          self.close_step(&step_id, fill, None, derived);
        }
        self.deadlines.clear();

        match status {
          StepStatus::Failed => Some(ExecutionStatus::Failed),
          StepStatus::Cancelled => Some(ExecutionStatus::Cancelled),
          _ => None,
        }
      }
    }
  }

  /// Mark a non-terminal step terminal and record the derived update.
  fn close_step(
    &mut self,
    step_id: &str,
    status: StepStatus,
    message: Option<&str>,
    derived: &mut Vec<StatusUpdate>,
  ) {
    let Some(step) = self.execution.step_mut(step_id) else {
      return;
    };
    step.status = status;
    step.finished_at = Some(Utc::now());
    if let Some(message) = message {
      step.error = Some(message.to_string());
    }

    let mut update = StatusUpdate::step(&self.execution.id, step_id, status).derived();
    if let Some(message) = message {
      update = update.with_message(message);
    }
    derived.push(update);
  }

  fn skip_dependents(&mut self, step_id: &str, derived: &mut Vec<StatusUpdate>) {
    for dependent in self.graph.transitive_dependents(step_id) {
      if self.execution.status_of(&dependent) == Some(StepStatus::Pending) {
        self.close_step(&dependent, StepStatus::Skipped, None, derived);
      }
    }
  }

  /// Settle the execution status once every step is terminal.
  fn finalize(&mut self, forced: Option<ExecutionStatus>, derived: &mut Vec<StatusUpdate>) {
    if self.execution.status.is_terminal() || !self.execution.all_steps_terminal() {
      return;
    }

    let status = forced.unwrap_or_else(|| {
      let any = |wanted: StepStatus| self.execution.steps.iter().any(|s| s.status == wanted);
      if self.cancel_requested {
        ExecutionStatus::Cancelled
      } else if any(StepStatus::Failed) {
        ExecutionStatus::Failed
      } else if any(StepStatus::Cancelled) {
        ExecutionStatus::Cancelled
      } else {
        ExecutionStatus::Succeeded
      }
    });

    self.execution.status = status;
    self.execution.finished_at = Some(Utc::now());
    self.deadlines.clear();
    derived.push(
      StatusUpdate::pipeline(&self.execution.id, execution_status_as_step(status)).derived(),
    );
  }

  /// Pending steps are cancelled at once; running steps wait for the
  /// executor to confirm.
  pub(crate) fn cancel(&mut self) -> Vec<StatusUpdate> {
    let mut derived = Vec::new();
    self.cancel_requested = true;

    let pending: Vec<String> = self
      .execution
      .steps
      .iter()
      .filter(|s| s.status == StepStatus::Pending)
      .map(|s| s.step_id.clone())
      .collect();
    for step_id in pending {
      self.close_step(&step_id, StepStatus::Cancelled, None, &mut derived);
    }

    self.finalize(None, &mut derived);
    derived
  }

  /// Check that `step_id` can be retried and work out which skipped
  /// dependents come back with it.
  ///
  /// A skipped dependent is only requeued if no other failed or cancelled
  /// step still blocks it.
  pub(crate) fn plan_retry(&self, step_id: &str) -> Result<Vec<String>, OrchestratorError> {
    let status = self.execution.status_of(step_id).ok_or_else(|| {
      OrchestratorError::StepNotFound {
        execution_id: self.execution.id.clone(),
        step_id: step_id.to_string(),
      }
    })?;

    if self.cancel_requested || self.execution.status == ExecutionStatus::Cancelled {
      return Err(OrchestratorError::InvalidRetry {
        step_id: step_id.to_string(),
        reason: "execution was cancelled".to_string(),
      });
    }
    if status != StepStatus::Failed {
      return Err(OrchestratorError::InvalidRetry {
        step_id: step_id.to_string(),
        reason: format!("step is {status}, only failed steps can be retried"),
      });
    }

    let blocked: HashSet<String> = self
      .execution
      .steps
      .iter()
      .filter(|s| s.step_id != step_id && s.status.blocks_dependents())
      .flat_map(|s| self.graph.transitive_dependents(&s.step_id))
      .collect();

    let dependents: HashSet<String> = self.graph.transitive_dependents(step_id).into_iter().collect();

    Ok(
      self
        .graph
        .step_ids()
        .iter()
        .filter(|id| dependents.contains(*id) && !blocked.contains(*id))
        .filter(|id| self.execution.status_of(id) == Some(StepStatus::Skipped))
        .cloned()
        .collect(),
    )
  }

  /// Reset the retried step and its requeued dependents to pending.
  pub(crate) fn apply_retry(&mut self, step_id: &str, requeued: &[String]) -> Vec<StatusUpdate> {
    let mut derived = Vec::new();

    for id in std::iter::once(step_id).chain(requeued.iter().map(String::as_str)) {
      let Some(step) = self.execution.step_mut(id) else {
        continue;
      };
      step.status = StepStatus::Pending;
      step.started_at = None;
      step.finished_at = None;
      step.error = None;
      if id == step_id {
        step.retry_count += 1;
      }
      derived.push(StatusUpdate::step(&self.execution.id, id, StepStatus::Pending).derived());
    }

    self.execution.status = ExecutionStatus::Running;
    self.execution.finished_at = None;
    derived
  }

  /// Fail every running step whose deadline has passed.
  pub(crate) fn expire(&mut self, now: Instant) -> Vec<StatusUpdate> {
    let mut derived = Vec::new();

    let overdue: Vec<String> = self
      .graph
      .step_ids()
      .iter()
      .filter(|id| self.deadlines.get(*id).is_some_and(|deadline| *deadline <= now))
      .cloned()
      .collect();

    for step_id in overdue {
      self.deadlines.remove(&step_id);
      if self.execution.status_of(&step_id) != Some(StepStatus::Running) {
        continue;
      }
      warn!(
        execution_id = %self.execution.id,
        step_id = %step_id,
        "step exceeded its deadline"
      );
      self.close_step(&step_id, StepStatus::Failed, Some(TIMED_OUT), &mut derived);
      self.skip_dependents(&step_id, &mut derived);
    }

    self.finalize(None, &mut derived);
    derived
  }
}
