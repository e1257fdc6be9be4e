use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use pipewright_store::PipelineExecution;
use tokio::sync::broadcast;

use crate::error::OrchestratorError;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Observable cache of in-flight and historical executions.
///
/// Readers get cloned snapshots and may read concurrently. Only the
/// orchestrator writes, so a reader never sees a half-applied update. Every
/// new snapshot is also published on [`changes`](Self::changes).
#[derive(Clone)]
pub struct ExecutionStateStore {
  inner: Arc<StateInner>,
}

struct StateInner {
  executions: RwLock<HashMap<String, PipelineExecution>>,
  changes: broadcast::Sender<PipelineExecution>,
}

impl ExecutionStateStore {
  pub fn new() -> Self {
    let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
    Self {
      inner: Arc::new(StateInner {
        executions: RwLock::new(HashMap::new()),
        changes,
      }),
    }
  }

  pub fn get(&self, execution_id: &str) -> Option<PipelineExecution> {
    self
      .inner
      .executions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(execution_id)
      .cloned()
  }

  /// All executions, oldest first.
  pub fn list(&self) -> Vec<PipelineExecution> {
    self.collect(|_| true)
  }

  /// Executions of one pipeline, oldest first.
  pub fn list_for_pipeline(&self, pipeline_id: &str) -> Vec<PipelineExecution> {
    self.collect(|e| e.pipeline_id == pipeline_id)
  }

  /// Subscribe to snapshots published after this call.
  ///
  /// A receiver that falls behind by more than the channel capacity gets
  /// `RecvError::Lagged` and should re-read with [`get`](Self::get).
  pub fn changes(&self) -> broadcast::Receiver<PipelineExecution> {
    self.inner.changes.subscribe()
  }

  fn collect(&self, filter: impl Fn(&PipelineExecution) -> bool) -> Vec<PipelineExecution> {
    let mut executions: Vec<PipelineExecution> = self
      .inner
      .executions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .filter(|e| filter(e))
      .cloned()
      .collect();
    executions.sort_by(|a, b| {
      a.started_at
        .cmp(&b.started_at)
        .then_with(|| a.id.cmp(&b.id))
    });
    executions
  }

  pub(crate) fn publish(&self, execution: PipelineExecution) {
    self
      .inner
      .executions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(execution.id.clone(), execution.clone());
    // no receivers is fine
    let _ = self.inner.changes.send(execution);
  }

  /// Drop a finished execution from history.
  pub(crate) fn purge(&self, execution_id: &str) -> Result<PipelineExecution, OrchestratorError> {
    let mut executions = self
      .inner
      .executions
      .write()
      .unwrap_or_else(PoisonError::into_inner);

    match executions.get(execution_id).map(|e| e.status) {
      None => Err(OrchestratorError::ExecutionNotFound(execution_id.to_string())),
      Some(status) if !status.is_terminal() => {
        Err(OrchestratorError::ExecutionActive(execution_id.to_string()))
      }
      Some(_) => executions
        .remove(execution_id)
        .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string())),
    }
  }
}

impl Default for ExecutionStateStore {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};
  use pipewright_store::ExecutionStatus;

  fn make_execution(id: &str, pipeline_id: &str, status: ExecutionStatus, age_secs: i64) -> PipelineExecution {
    PipelineExecution {
      id: id.to_string(),
      pipeline_id: pipeline_id.to_string(),
      status,
      started_at: Utc::now() - Duration::seconds(age_secs),
      finished_at: None,
      steps: vec![],
    }
  }

  #[test]
  fn test_list_order_and_filter() {
    let store = ExecutionStateStore::new();
    store.publish(make_execution("b", "p1", ExecutionStatus::Running, 5));
    store.publish(make_execution("a", "p2", ExecutionStatus::Running, 10));
    store.publish(make_execution("c", "p1", ExecutionStatus::Pending, 1));

    let ids: Vec<String> = store.list().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let ids: Vec<String> = store.list_for_pipeline("p1").into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["b", "c"]);
  }

  #[tokio::test]
  async fn test_changes_receive_snapshots() {
    let store = ExecutionStateStore::new();
    let mut changes = store.changes();

    store.publish(make_execution("a", "p1", ExecutionStatus::Running, 0));
    let snapshot = changes.recv().await.unwrap();
    assert_eq!(snapshot.id, "a");
    assert_eq!(store.get("a").unwrap().status, ExecutionStatus::Running);
  }

  #[test]
  fn test_purge_only_terminal() {
    let store = ExecutionStateStore::new();
    store.publish(make_execution("a", "p1", ExecutionStatus::Running, 0));

    assert!(matches!(
      store.purge("a"),
      Err(OrchestratorError::ExecutionActive(_))
    ));
    assert!(matches!(
      store.purge("zzz"),
      Err(OrchestratorError::ExecutionNotFound(_))
    ));

    store.publish(make_execution("a", "p1", ExecutionStatus::Failed, 0));
    store.purge("a").unwrap();
    assert!(store.get("a").is_none());
  }
}
