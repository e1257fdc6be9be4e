use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use pipewright_store::StepStatus;
use pipewright_workflow::ExecutionPlan;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecutorError;
use crate::executor::{RemoteExecutor, RetryRequest, SubmitRequest};
use crate::update::StatusUpdate;

/// Executor that runs nothing.
///
/// Each submitted plan is walked wave by wave: every step in a wave reports
/// `running`, then `succeeded` (or `failed` when listed in
/// [`failing`](Self::failing)). Steps downstream of a failure are left for
/// the orchestrator to skip. Updates go out on the channel given to
/// [`new`](Self::new), in order.
pub struct DryRunExecutor {
  updates: mpsc::Sender<StatusUpdate>,
  step_delay: Duration,
  failing: Arc<Mutex<HashSet<String>>>,
  runs: Mutex<HashMap<String, DryRun>>,
}

struct DryRun {
  plan: ExecutionPlan,
  depends_on: Arc<HashMap<String, Vec<String>>>,
  cancel: CancellationToken,
}

impl DryRunExecutor {
  pub fn new(updates: mpsc::Sender<StatusUpdate>) -> Self {
    Self {
      updates,
      step_delay: Duration::ZERO,
      failing: Arc::new(Mutex::new(HashSet::new())),
      runs: Mutex::new(HashMap::new()),
    }
  }

  /// Pause between a wave's `running` and its results.
  pub fn with_step_delay(mut self, delay: Duration) -> Self {
    self.step_delay = delay;
    self
  }

  /// Report these step ids as failed.
  pub fn failing<I, S>(self, step_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.set_failing(step_ids);
    self
  }

  /// Replace the set of failing step ids. Affects steps not yet reported.
  pub fn set_failing<I, S>(&self, step_ids: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    *self.failing.lock().unwrap_or_else(PoisonError::into_inner) =
      step_ids.into_iter().map(Into::into).collect();
  }

  fn spawn_walk(&self, execution_id: String, waves: Vec<Vec<String>>, run: &DryRun) {
    let walk = Walk {
      execution_id,
      updates: self.updates.clone(),
      step_delay: self.step_delay,
      failing: self.failing.clone(),
      depends_on: run.depends_on.clone(),
      cancel: run.cancel.clone(),
    };
    tokio::spawn(walk.run(waves));
  }
}

struct Walk {
  execution_id: String,
  updates: mpsc::Sender<StatusUpdate>,
  step_delay: Duration,
  failing: Arc<Mutex<HashSet<String>>>,
  depends_on: Arc<HashMap<String, Vec<String>>>,
  cancel: CancellationToken,
}

impl Walk {
  async fn run(self, waves: Vec<Vec<String>>) {
    let mut blocked: HashSet<String> = HashSet::new();

    for wave in waves {
      let (runnable, downstream_of_failure): (Vec<String>, Vec<String>) =
        wave.into_iter().partition(|id| {
          let deps = self.depends_on.get(id).map(Vec::as_slice).unwrap_or(&[]);
          !deps.iter().any(|dep| blocked.contains(dep))
        });
      blocked.extend(downstream_of_failure);

      for step_id in &runnable {
        if !self.send(step_id, StepStatus::Running).await {
          return;
        }
      }

      if !self.step_delay.is_zero() {
        tokio::select! {
          _ = self.cancel.cancelled() => {}
          _ = tokio::time::sleep(self.step_delay) => {}
        }
      }

      if self.cancel.is_cancelled() {
        for step_id in &runnable {
          self.send(step_id, StepStatus::Cancelled).await;
        }
        debug!(execution_id = %self.execution_id, "dry run cancelled");
        return;
      }

      for step_id in &runnable {
        let fails = self
          .failing
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .contains(step_id);
        let status = if fails {
          blocked.insert(step_id.clone());
          StepStatus::Failed
        } else {
          StepStatus::Succeeded
        };
        if !self.send(step_id, status).await {
          return;
        }
      }
    }
  }

  /// Returns false once the orchestrator side is gone.
  async fn send(&self, step_id: &str, status: StepStatus) -> bool {
    let mut update = StatusUpdate::step(&self.execution_id, step_id, status)
      .with_log_ref(format!("dry-run://{}/{}", self.execution_id, step_id));
    if status == StepStatus::Failed {
      update = update.with_message("marked as failing");
    }
    self.updates.send(update).await.is_ok()
  }
}

#[async_trait]
impl RemoteExecutor for DryRunExecutor {
  async fn submit(&self, request: &SubmitRequest) -> Result<String, ExecutorError> {
    if self.updates.is_closed() {
      return Err(ExecutorError::Unreachable("update channel closed".to_string()));
    }

    let execution_id = uuid::Uuid::new_v4().to_string();
    let run = DryRun {
      plan: request.plan.clone(),
      depends_on: Arc::new(
        request
          .steps
          .iter()
          .map(|s| (s.id.clone(), s.depends_on.clone()))
          .collect(),
      ),
      cancel: CancellationToken::new(),
    };

    self.spawn_walk(execution_id.clone(), run.plan.waves.clone(), &run);
    self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(execution_id.clone(), run);

    debug!(execution_id = %execution_id, "dry run started");
    Ok(execution_id)
  }

  async fn cancel(&self, execution_id: &str) -> Result<(), ExecutorError> {
    let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
    let run = runs
      .get(execution_id)
      .ok_or_else(|| ExecutorError::UnknownExecution(execution_id.to_string()))?;
    run.cancel.cancel();
    Ok(())
  }

  async fn retry_step(&self, request: &RetryRequest) -> Result<(), ExecutorError> {
    let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
    let run = runs
      .get(&request.execution_id)
      .ok_or_else(|| ExecutorError::UnknownExecution(request.execution_id.clone()))?;

    let mut wanted: HashSet<&str> = request.requeued.iter().map(String::as_str).collect();
    wanted.insert(request.step_id.as_str());
    let waves: Vec<Vec<String>> = run
      .plan
      .waves
      .iter()
      .map(|wave| {
        wave
          .iter()
          .filter(|id| wanted.contains(id.as_str()))
          .cloned()
          .collect::<Vec<_>>()
      })
      .filter(|wave| !wave.is_empty())
      .collect();

    self.spawn_walk(request.execution_id.clone(), waves, run);
    Ok(())
  }
}
