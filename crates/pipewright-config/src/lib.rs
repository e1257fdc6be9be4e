//! Pipewright Config
//!
//! This crate contains the serializable pipeline types for pipewright.
//! These types describe *what* must run: the steps of a pipeline, the
//! dependencies between them, and the variables and secret references that
//! parameterize them.
//!
//! Pipelines can be:
//! - Generated from a template (see `pipewright-template`)
//! - Edited directly and persisted as JSON (see `pipewright-store`)
//!
//! Nothing in this crate executes a step. Graph validation and planning live
//! in `pipewright-workflow`; execution tracking lives in
//! `pipewright-orchestrator`.

mod context;
mod pipeline;
mod step;
mod variable;

pub use context::{ExecutionContext, ExecutionKind};
pub use pipeline::Pipeline;
pub use step::{Step, StepConfig, StepKind};
pub use variable::{Scope, SecretReference, Variable, VariableValue};
