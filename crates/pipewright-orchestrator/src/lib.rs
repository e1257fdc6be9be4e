//! Pipewright Orchestrator
//!
//! Submits validated pipelines to a remote executor and tracks the status
//! updates it reports back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │  - execute(pipeline_id): validate → resolve → plan → submit │
//! │  - cancel / retry_step                                      │
//! │  - listen(updates, cancel): single-writer update loop       │
//! └─────────────────────────────────────────────────────────────┘
//!            │ submit / cancel / retry            ▲ StatusUpdate
//!            ▼                                    │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RemoteExecutor                         │
//! │  - runs the steps, reports progress asynchronously          │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   Orchestrator ──► ExecutionStateStore (snapshots, changes())
//!                └─► Subscription / on_update (per-execution fan-out)
//! ```
//!
//! Step outcomes come only from the executor. The orchestrator derives the
//! rest locally: dependents of a failed or cancelled step are skipped,
//! pending steps are cancelled on `cancel`, steps past their deadline are
//! failed, and the execution is finalized once every step is terminal.

mod config;
mod dry_run;
mod error;
mod executor;
mod orchestrator;
mod parked;
mod run;
mod state;
mod subscription;
mod update;

pub use config::OrchestratorConfig;
pub use dry_run::DryRunExecutor;
pub use error::{ExecutorError, OrchestratorError};
pub use executor::{RemoteExecutor, RetryRequest, SubmitRequest, SubmittedStep};
pub use orchestrator::Orchestrator;
pub use state::ExecutionStateStore;
pub use subscription::{Subscription, Unsubscribe};
pub use update::{StatusUpdate, UpdateSource};
