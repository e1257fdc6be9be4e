//! Updates that reach the orchestrator before (or after) their execution is
//! registered.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::update::StatusUpdate;

/// Bounded holding area keyed by execution id.
///
/// Both the number of updates per id and the number of ids are capped. When
/// the id cap is reached the oldest parked id is evicted. Ids retired by a
/// purge are remembered (also bounded) and their late updates are dropped.
pub(crate) struct ParkedUpdates {
  queues: HashMap<String, VecDeque<StatusUpdate>>,
  /// Parked ids, oldest first.
  order: VecDeque<String>,
  retired: HashSet<String>,
  retired_order: VecDeque<String>,
  max_updates: usize,
  max_executions: usize,
  max_retired: usize,
}

impl ParkedUpdates {
  pub fn new(config: &OrchestratorConfig) -> Self {
    Self {
      queues: HashMap::new(),
      order: VecDeque::new(),
      retired: HashSet::new(),
      retired_order: VecDeque::new(),
      max_updates: config.max_parked_updates,
      max_executions: config.max_parked_executions,
      max_retired: config.max_retired_executions,
    }
  }

  pub fn park(&mut self, update: StatusUpdate) {
    let execution_id = update.execution_id.clone();

    if self.retired.contains(&execution_id) {
      debug!(execution_id = %execution_id, "dropping update for purged execution");
      return;
    }

    if !self.queues.contains_key(&execution_id) {
      if self.max_executions == 0 {
        warn!(execution_id = %execution_id, "dropping update for unknown execution");
        return;
      }
      while self.queues.len() >= self.max_executions {
        let Some(oldest) = self.order.pop_front() else {
          break;
        };
        if let Some(dropped) = self.queues.remove(&oldest) {
          warn!(
            execution_id = %oldest,
            dropped = dropped.len(),
            "evicting updates parked for unknown execution"
          );
        }
      }
      self.order.push_back(execution_id.clone());
    }

    let queue = self.queues.entry(execution_id.clone()).or_default();
    if queue.len() >= self.max_updates {
      warn!(
        execution_id = %execution_id,
        limit = self.max_updates,
        "dropping update for unknown execution"
      );
      return;
    }
    debug!(execution_id = %execution_id, "parking update for unknown execution");
    queue.push_back(update);
  }

  /// Remove and return everything parked for `execution_id`, oldest first.
  pub fn take(&mut self, execution_id: &str) -> VecDeque<StatusUpdate> {
    let Some(queue) = self.queues.remove(execution_id) else {
      return VecDeque::new();
    };
    self.order.retain(|id| id != execution_id);
    queue
  }

  /// Stop accepting updates for a purged execution.
  pub fn retire(&mut self, execution_id: &str) {
    self.take(execution_id);
    if self.max_retired == 0 || !self.retired.insert(execution_id.to_string()) {
      return;
    }
    self.retired_order.push_back(execution_id.to_string());
    while self.retired_order.len() > self.max_retired {
      if let Some(oldest) = self.retired_order.pop_front() {
        self.retired.remove(&oldest);
      }
    }
  }

  #[cfg(test)]
  fn execution_count(&self) -> usize {
    self.queues.len()
  }
}

#[cfg(test)]
mod tests {
  use pipewright_store::StepStatus;

  use super::*;

  fn parked(max_updates: usize, max_executions: usize, max_retired: usize) -> ParkedUpdates {
    ParkedUpdates::new(&OrchestratorConfig {
      max_parked_updates: max_updates,
      max_parked_executions: max_executions,
      max_retired_executions: max_retired,
      ..Default::default()
    })
  }

  fn running(execution_id: &str) -> StatusUpdate {
    StatusUpdate::step(execution_id, "build", StepStatus::Running)
  }

  #[test]
  fn test_distinct_ids_are_capped() {
    let mut parked = parked(8, 16, 16);
    for i in 0..10_000 {
      parked.park(running(&format!("exec-{i}")));
    }

    assert_eq!(parked.execution_count(), 16);
    assert!(parked.take("exec-0").is_empty());
    assert_eq!(parked.take("exec-9999").len(), 1);
  }

  #[test]
  fn test_oldest_id_is_evicted_first() {
    let mut parked = parked(8, 2, 16);
    parked.park(running("a"));
    parked.park(running("b"));
    parked.park(running("a"));
    parked.park(running("c"));

    assert!(parked.take("a").is_empty());
    assert_eq!(parked.take("b").len(), 1);
    assert_eq!(parked.take("c").len(), 1);
  }

  #[test]
  fn test_updates_per_id_are_capped() {
    let mut parked = parked(2, 16, 16);
    for _ in 0..5 {
      parked.park(running("a"));
    }
    assert_eq!(parked.take("a").len(), 2);
  }

  #[test]
  fn test_taken_id_frees_its_slot() {
    let mut parked = parked(8, 1, 16);
    parked.park(running("a"));
    parked.take("a");
    parked.park(running("b"));
    parked.park(running("b"));

    assert_eq!(parked.take("b").len(), 2);
  }

  #[test]
  fn test_retired_ids_are_not_parked() {
    let mut parked = parked(8, 16, 2);
    parked.park(running("a"));
    parked.retire("a");
    parked.park(running("a"));

    assert_eq!(parked.execution_count(), 0);
    assert!(parked.take("a").is_empty());
  }

  #[test]
  fn test_retired_ids_are_bounded() {
    let mut parked = parked(8, 16, 2);
    parked.retire("a");
    parked.retire("b");
    parked.retire("c");

    parked.park(running("a"));
    parked.park(running("c"));
    assert_eq!(parked.take("a").len(), 1);
    assert!(parked.take("c").is_empty());
  }
}
