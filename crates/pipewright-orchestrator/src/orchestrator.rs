use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use pipewright_config::{Pipeline, Scope};
use pipewright_resolver::{ResolvedEnv, Resolver};
use pipewright_store::{
  ExecutionStatus, PipelineExecution, PipelineStore, StepExecution, StoreError,
};
use pipewright_workflow::{Graph, plan, validate};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::executor::{RemoteExecutor, RetryRequest, SubmitRequest, SubmittedStep};
use crate::parked::ParkedUpdates;
use crate::run::RunState;
use crate::state::ExecutionStateStore;
use crate::subscription::{Subscribers, Subscription, Unsubscribe};
use crate::update::StatusUpdate;

/// Submits pipelines to a remote executor and tracks what it reports back.
///
/// Mutations of one execution are serialized by a per-execution lock, so a
/// cancel racing a step result cannot finalize the run twice. Updates for
/// different executions are applied independently.
///
/// # Usage
///
/// ```ignore
/// let (tx, rx) = mpsc::channel(256);
/// let orchestrator = Arc::new(Orchestrator::new(store, resolver, executor, config));
///
/// // Feed executor updates into the single-writer loop
/// let cancel = CancellationToken::new();
/// tokio::spawn({
///   let orchestrator = orchestrator.clone();
///   async move { orchestrator.listen(rx, cancel).await }
/// });
///
/// let execution = orchestrator.execute(&pipeline_id).await?;
/// let mut updates = orchestrator.subscribe(&execution.id)?;
/// ```
pub struct Orchestrator {
  pipelines: Arc<dyn PipelineStore>,
  resolver: Arc<dyn Resolver>,
  executor: Arc<dyn RemoteExecutor>,
  config: OrchestratorConfig,
  state: ExecutionStateStore,
  runs: StdMutex<Runs>,
  subscribers: Arc<Subscribers>,
}

struct Runs {
  active: HashMap<String, Arc<Mutex<RunState>>>,
  /// Updates for execution ids whose `submit` has not returned yet.
  parked: ParkedUpdates,
}

impl Orchestrator {
  pub fn new(
    pipelines: Arc<dyn PipelineStore>,
    resolver: Arc<dyn Resolver>,
    executor: Arc<dyn RemoteExecutor>,
    config: OrchestratorConfig,
  ) -> Self {
    Self {
      pipelines,
      resolver,
      executor,
      state: ExecutionStateStore::new(),
      runs: StdMutex::new(Runs {
        active: HashMap::new(),
        parked: ParkedUpdates::new(&config),
      }),
      subscribers: Arc::new(Subscribers::default()),
      config,
    }
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.config
  }

  /// Read side of the execution cache.
  pub fn state(&self) -> &ExecutionStateStore {
    &self.state
  }

  pub fn get_execution(&self, execution_id: &str) -> Option<PipelineExecution> {
    self.state.get(execution_id)
  }

  /// Validate, resolve, plan and submit a pipeline.
  ///
  /// Nothing reaches the executor unless the step graph validates. If the
  /// executor rejects the submission no execution is recorded.
  #[instrument(skip(self))]
  pub async fn execute(&self, pipeline_id: &str) -> Result<PipelineExecution, OrchestratorError> {
    let pipeline = self.pipelines.get(pipeline_id).await.map_err(|e| match e {
      StoreError::NotFound(_) => OrchestratorError::PipelineNotFound(pipeline_id.to_string()),
      other => OrchestratorError::Store(other),
    })?;

    if !pipeline.enabled {
      return Err(OrchestratorError::PipelineDisabled(pipeline.id));
    }

    let report = validate(&pipeline.steps);
    if !report.is_valid() {
      warn!(errors = %report, "refusing to submit invalid pipeline");
      return Err(OrchestratorError::Validation(report));
    }

    let env = self
      .resolver
      .resolve_all(&Scope::pipeline(&pipeline.id))
      .await?;
    let working_directory = self.render_working_directory(&pipeline, &env)?;

    let request = SubmitRequest {
      pipeline_id: pipeline.id.clone(),
      plan: plan(&pipeline.steps),
      steps: pipeline
        .steps
        .iter()
        .map(|s| SubmittedStep {
          id: s.id.clone(),
          kind: s.kind.clone(),
          config: s.config.clone(),
          depends_on: s.depends_on.clone(),
        })
        .collect(),
      env,
      working_directory,
    };

    let execution_id = self
      .executor
      .submit(&request)
      .await
      .map_err(OrchestratorError::Submission)?;

    let execution = PipelineExecution {
      id: execution_id.clone(),
      pipeline_id: pipeline.id.clone(),
      status: ExecutionStatus::Pending,
      started_at: Utc::now(),
      finished_at: None,
      steps: pipeline
        .steps
        .iter()
        .map(|s| StepExecution::pending(&s.id))
        .collect(),
    };
    let run = RunState::new(
      execution,
      Graph::new(&pipeline.steps),
      request.env,
      self.config.step_timeout,
    );

    let snapshot = self.register(run).await?;
    info!(
      execution_id = %execution_id,
      waves = request.plan.waves.len(),
      steps = request.plan.step_count(),
      "submitted pipeline"
    );
    Ok(snapshot)
  }

  fn render_working_directory(
    &self,
    pipeline: &Pipeline,
    env: &ResolvedEnv,
  ) -> Result<String, OrchestratorError> {
    let project_path = self
      .config
      .project_root
      .as_ref()
      .map(|p| p.display().to_string())
      .unwrap_or_else(|| ".".to_string());

    let mut vars: BTreeMap<String, String> = env.values().clone();
    vars.insert("project_path".to_string(), project_path);
    vars.insert("project_id".to_string(), pipeline.project_id.clone());
    vars.insert("pipeline_id".to_string(), pipeline.id.clone());

    pipeline
      .context
      .render_working_directory(&vars)
      .map_err(OrchestratorError::WorkingDirectory)
  }

  /// Make a run visible and replay anything that arrived before it.
  ///
  /// The run is locked before it is published so updates arriving now queue
  /// behind the replay.
  async fn register(&self, run: RunState) -> Result<PipelineExecution, OrchestratorError> {
    let execution_id = run.execution.id.clone();
    let run = Arc::new(Mutex::new(run));
    let mut guard = run.clone().lock_owned().await;

    let parked = {
      let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
      if runs.active.contains_key(&execution_id) {
        return Err(OrchestratorError::Submission(
          crate::ExecutorError::Rejected(format!("duplicate execution id {execution_id}")),
        ));
      }
      runs.active.insert(execution_id.clone(), run);
      runs.parked.take(&execution_id)
    };

    let derived = guard.start();
    self.publish(&guard, &derived);

    if !parked.is_empty() {
      debug!(
        execution_id = %execution_id,
        count = parked.len(),
        "replaying early updates"
      );
    }
    for update in parked {
      self.apply_locked(&mut guard, update);
    }

    Ok(guard.execution.clone())
  }

  fn run(&self, execution_id: &str) -> Result<Arc<Mutex<RunState>>, OrchestratorError> {
    self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .active
      .get(execution_id)
      .cloned()
      .ok_or_else(|| OrchestratorError::ExecutionNotFound(execution_id.to_string()))
  }

  /// Apply one update from the executor.
  ///
  /// Updates for an execution id that is not registered yet are parked and
  /// replayed once `execute` registers it. Updates for purged executions are
  /// dropped.
  pub async fn apply_update(&self, update: StatusUpdate) {
    let run = {
      let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
      let Some(run) = runs.active.get(&update.execution_id).cloned() else {
        runs.parked.park(update);
        return;
      };
      run
    };

    let mut run = run.lock().await;
    self.apply_locked(&mut run, update);
  }

  fn apply_locked(&self, run: &mut RunState, update: StatusUpdate) {
    let derived = run.apply(&update, Instant::now());
    self.subscribers.forward(&update);
    self.publish(run, &derived);

    if run.execution.status.is_terminal() && derived.iter().any(StatusUpdate::is_final) {
      info!(
        execution_id = %run.execution.id,
        status = %run.execution.status,
        "execution finished"
      );
    }
  }

  fn publish(&self, run: &RunState, derived: &[StatusUpdate]) {
    for update in derived {
      self.subscribers.forward(update);
    }
    self.state.publish(run.execution.clone());
  }

  /// Ask the executor to stop an execution.
  ///
  /// Returns once the signal is sent. Pending steps are cancelled right
  /// away; running steps stay running until the executor confirms.
  /// Cancelling a finished execution is a no-op.
  pub async fn cancel(&self, execution_id: &str) -> Result<PipelineExecution, OrchestratorError> {
    let run = self.run(execution_id)?;
    let mut run = run.lock().await;

    if run.execution.status.is_terminal() {
      debug!(execution_id = %execution_id, "execution already finished, nothing to cancel");
      return Ok(run.execution.clone());
    }

    self
      .executor
      .cancel(execution_id)
      .await
      .map_err(OrchestratorError::Executor)?;

    let derived = run.cancel();
    self.publish(&run, &derived);
    info!(execution_id = %execution_id, "cancellation requested");
    Ok(run.execution.clone())
  }

  /// Run a failed step again.
  ///
  /// Skipped dependents that no other failure still blocks are requeued
  /// with it. The executor reuses the environment resolved at submission.
  pub async fn retry_step(
    &self,
    execution_id: &str,
    step_id: &str,
  ) -> Result<PipelineExecution, OrchestratorError> {
    let run = self.run(execution_id)?;
    let mut run = run.lock().await;

    let requeued = run.plan_retry(step_id)?;
    let request = RetryRequest {
      execution_id: execution_id.to_string(),
      step_id: step_id.to_string(),
      requeued: requeued.clone(),
      env: run.env.clone(),
    };
    self
      .executor
      .retry_step(&request)
      .await
      .map_err(OrchestratorError::Executor)?;

    let derived = run.apply_retry(step_id, &requeued);
    self.publish(&run, &derived);
    info!(
      execution_id = %execution_id,
      step_id = %step_id,
      requeued = requeued.len(),
      "retrying step"
    );
    Ok(run.execution.clone())
  }

  /// Receive every update applied to an execution from now on.
  pub fn subscribe(&self, execution_id: &str) -> Result<Subscription, OrchestratorError> {
    self.run(execution_id)?;
    Ok(self.subscribers.subscribe(execution_id))
  }

  /// Call `callback` for every update applied to an execution from now on.
  pub fn on_update<F>(&self, execution_id: &str, callback: F) -> Result<Unsubscribe, OrchestratorError>
  where
    F: Fn(StatusUpdate) + Send + 'static,
  {
    let mut subscription = self.subscribe(execution_id)?;
    let cancel = CancellationToken::new();
    let stopped = cancel.clone();

    tokio::spawn(async move {
      loop {
        tokio::select! {
          biased;
          _ = stopped.cancelled() => break,
          update = subscription.recv() => match update {
            Some(update) => callback(update),
            None => break,
          },
        }
      }
    });

    Ok(Unsubscribe::new(cancel.drop_guard()))
  }

  /// Forget a finished execution. Its subscriptions end.
  pub fn purge(&self, execution_id: &str) -> Result<PipelineExecution, OrchestratorError> {
    let execution = self.state.purge(execution_id)?;
    {
      let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
      runs.active.remove(execution_id);
      runs.parked.retire(execution_id);
    }
    self.subscribers.close(execution_id);
    Ok(execution)
  }

  /// Fail running steps that are past their deadline. Returns how many
  /// steps timed out.
  pub async fn expire_overdue_steps(&self) -> usize {
    if self.config.step_timeout.is_none() {
      return 0;
    }

    let runs: Vec<Arc<Mutex<RunState>>> = self
      .runs
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .active
      .values()
      .cloned()
      .collect();

    let now = Instant::now();
    let mut expired = 0;
    for run in runs {
      let mut run = run.lock().await;
      if run.execution.status.is_terminal() {
        continue;
      }
      let derived = run.expire(now);
      if derived.is_empty() {
        continue;
      }
      expired += derived
        .iter()
        .filter(|u| u.step_id.is_some() && u.message.as_deref() == Some(crate::run::TIMED_OUT))
        .count();
      self.publish(&run, &derived);
    }
    expired
  }

  /// Apply executor updates in arrival order until `cancel` fires or the
  /// channel closes. Step deadlines are swept on
  /// [`deadline_sweep_interval`](OrchestratorConfig::deadline_sweep_interval).
  pub async fn listen(&self, mut updates: mpsc::Receiver<StatusUpdate>, cancel: CancellationToken) {
    info!("starting orchestrator event loop");

    let mut sweep = tokio::time::interval(self.config.deadline_sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let sweeping = self.config.step_timeout.is_some();

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("orchestrator event loop cancelled");
          break;
        }
        update = updates.recv() => {
          match update {
            Some(update) => self.apply_update(update).await,
            None => {
              info!("status update channel closed");
              break;
            }
          }
        }
        _ = sweep.tick(), if sweeping => {
          self.expire_overdue_steps().await;
        }
      }
    }
  }
}
