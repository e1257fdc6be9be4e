use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
  /// How long a step may stay `running` before it is failed locally.
  /// `None` disables step deadlines.
  pub step_timeout: Option<Duration>,
  /// Rendered into working directories as `project_path`. Falls back to `.`.
  pub project_root: Option<PathBuf>,
  /// How often the event loop checks step deadlines.
  pub deadline_sweep_interval: Duration,
  /// Updates kept per execution id that has not been registered yet.
  pub max_parked_updates: usize,
  /// Unregistered execution ids with parked updates. The oldest is evicted
  /// when a new id arrives at the cap.
  pub max_parked_executions: usize,
  /// Purged execution ids remembered so their late updates are dropped.
  pub max_retired_executions: usize,
}

impl OrchestratorConfig {
  pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30 * 60);
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      step_timeout: Some(Self::DEFAULT_STEP_TIMEOUT),
      project_root: None,
      deadline_sweep_interval: Duration::from_secs(1),
      max_parked_updates: 256,
      max_parked_executions: 64,
      max_retired_executions: 1024,
    }
  }
}
