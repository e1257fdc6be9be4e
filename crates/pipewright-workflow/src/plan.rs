use std::collections::HashSet;

use pipewright_config::Step;
use serde::{Deserialize, Serialize};

/// Step ids that may be dispatched together once every earlier wave has
/// completed. Ordered by declaration order.
pub type Wave = Vec<String>;

/// The intended concurrency structure of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
  pub waves: Vec<Wave>,
}

impl ExecutionPlan {
  /// Total number of planned steps.
  pub fn step_count(&self) -> usize {
    self.waves.iter().map(Vec::len).sum()
  }

  /// Index of the wave containing `step_id`.
  pub fn wave_of(&self, step_id: &str) -> Option<usize> {
    self
      .waves
      .iter()
      .position(|wave| wave.iter().any(|id| id == step_id))
  }
}

/// Layer a validated step list into waves (Kahn-style).
///
/// Wave 0 holds the steps without dependencies; each later wave holds the
/// steps whose dependencies all appear in earlier waves.
///
/// Callers must run [`crate::validate`] first. On a cyclic or malformed
/// input the result is partial: planning stops as soon as a pass makes no
/// progress.
pub fn plan(steps: &[Step]) -> ExecutionPlan {
  let mut placed: HashSet<&str> = HashSet::with_capacity(steps.len());
  let mut remaining: Vec<&Step> = steps.iter().collect();
  let mut waves = Vec::new();

  while !remaining.is_empty() {
    let (ready, blocked): (Vec<&Step>, Vec<&Step>) = remaining.into_iter().partition(|step| {
      step
        .depends_on
        .iter()
        .all(|dep| placed.contains(dep.as_str()))
    });

    if ready.is_empty() {
      break;
    }

    let mut wave = Wave::with_capacity(ready.len());
    for step in ready {
      if placed.insert(step.id.as_str()) {
        wave.push(step.id.clone());
      }
    }
    waves.push(wave);
    remaining = blocked;
  }

  ExecutionPlan { waves }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::validate;
  use pipewright_config::ExecutionKind;

  fn make_step(id: &str, deps: &[&str]) -> Step {
    Step::new(id, id, ExecutionKind::Shell).depends_on(deps.iter().copied())
  }

  fn waves(plan: &ExecutionPlan) -> Vec<Vec<&str>> {
    plan
      .waves
      .iter()
      .map(|w| w.iter().map(String::as_str).collect())
      .collect()
  }

  #[test]
  fn test_install_lint_test_build() {
    let steps = vec![
      make_step("install", &[]),
      make_step("lint", &["install"]),
      make_step("test", &["install"]),
      make_step("build", &["lint", "test"]),
    ];
    assert!(validate(&steps).is_valid());

    let plan = plan(&steps);
    assert_eq!(
      waves(&plan),
      vec![vec!["install"], vec!["lint", "test"], vec!["build"]]
    );
  }

  #[test]
  fn test_tie_break_follows_declaration_order() {
    let steps = vec![
      make_step("zeta", &[]),
      make_step("alpha", &[]),
      make_step("mid", &[]),
    ];

    assert_eq!(waves(&plan(&steps)), vec![vec!["zeta", "alpha", "mid"]]);
  }

  #[test]
  fn test_declared_before_dependency() {
    let steps = vec![make_step("deploy", &["build"]), make_step("build", &[])];

    assert_eq!(waves(&plan(&steps)), vec![vec!["build"], vec!["deploy"]]);
  }

  #[test]
  fn test_dependencies_in_strictly_earlier_waves() {
    let steps = vec![
      make_step("a", &[]),
      make_step("b", &["a"]),
      make_step("c", &[]),
      make_step("d", &["b", "c"]),
      make_step("e", &["a"]),
      make_step("f", &["e", "d"]),
    ];
    let plan = plan(&steps);

    assert_eq!(plan.step_count(), steps.len());
    for step in &steps {
      let own = plan.wave_of(&step.id).unwrap();
      for dep in &step.depends_on {
        assert!(plan.wave_of(dep).unwrap() < own, "{dep} must precede {}", step.id);
      }
    }
  }

  #[test]
  fn test_cycle_yields_partial_plan() {
    let steps = vec![
      make_step("ok", &[]),
      make_step("a", &["b"]),
      make_step("b", &["a"]),
    ];

    let plan = plan(&steps);
    assert_eq!(waves(&plan), vec![vec!["ok"]]);
  }

  #[test]
  fn test_empty() {
    assert!(plan(&[]).waves.is_empty());
  }
}
