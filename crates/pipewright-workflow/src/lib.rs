//! Pipewright Workflow
//!
//! Pure, synchronous graph algorithms over a pipeline's steps:
//! - [`validate`] checks structural correctness (unique ids, no dangling
//!   dependencies, no cycles) and reports every problem as data
//! - [`plan`] turns a validated step list into ordered waves of steps that
//!   may be dispatched together
//! - [`Graph`] answers upstream/downstream questions for the orchestrator
//!
//! None of these functions hold state or suspend, so they are safe to call
//! from any thread.

mod error;
mod graph;
mod plan;
mod validate;

pub use error::ValidationError;
pub use graph::Graph;
pub use plan::{ExecutionPlan, Wave, plan};
pub use validate::{ValidationReport, validate};
