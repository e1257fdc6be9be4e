use std::collections::{HashMap, HashSet};

use pipewright_config::Step;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::graph::Graph;

/// Outcome of [`validate`]: every violation found, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub errors: Vec<ValidationError>,
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool {
    self.errors.is_empty()
  }

  /// Human-readable error list.
  pub fn messages(&self) -> Vec<String> {
    self.errors.iter().map(ToString::to_string).collect()
  }
}

impl std::fmt::Display for ValidationReport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.messages().join("; "))
  }
}

/// Check a step list for duplicate ids, dangling dependencies and cycles.
///
/// All violations are accumulated. Never panics on well-typed input.
pub fn validate(steps: &[Step]) -> ValidationReport {
  let mut errors = Vec::new();

  // (a) duplicate ids
  let mut seen: HashSet<&str> = HashSet::new();
  let mut reported: HashSet<&str> = HashSet::new();
  for step in steps {
    if !seen.insert(step.id.as_str()) && reported.insert(step.id.as_str()) {
      errors.push(ValidationError::DuplicateStepId {
        step_id: step.id.clone(),
      });
    }
  }

  // (b) dangling references
  for step in steps {
    for dep in &step.depends_on {
      if !seen.contains(dep.as_str()) {
        errors.push(ValidationError::UnknownDependency {
          step_id: step.id.clone(),
          depends_on: dep.clone(),
        });
      }
    }
  }

  // (c) cycles
  errors.extend(find_cycles(&Graph::new(steps)));

  ValidationReport { errors }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
  Unvisited,
  InProgress,
  Done,
}

/// Depth-first search with three-color marking. Each back-edge yields one
/// cycle error naming the ids on the cycle.
///
/// The walk keeps its own `(node, next dependency index)` stack so chain
/// depth is bounded by heap, not by the thread stack.
fn find_cycles(graph: &Graph) -> Vec<ValidationError> {
  let mut color: HashMap<&str, Color> = graph
    .step_ids()
    .iter()
    .map(|id| (id.as_str(), Color::Unvisited))
    .collect();
  let mut cycles = Vec::new();

  for root in graph.step_ids() {
    if color.get(root.as_str()) != Some(&Color::Unvisited) {
      continue;
    }

    let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
    color.insert(root.as_str(), Color::InProgress);

    while let Some(frame) = stack.last_mut() {
      let (node, next) = *frame;
      let Some(dep) = graph.upstream(node).get(next) else {
        stack.pop();
        color.insert(node, Color::Done);
        continue;
      };
      frame.1 += 1;

      match color.get(dep.as_str()).copied() {
        Some(Color::InProgress) => {
          // Back edge: the cycle is the stack suffix starting at `dep`.
          let start = stack.iter().position(|(id, _)| *id == dep.as_str()).unwrap_or(0);
          let mut path: Vec<String> = stack[start..].iter().map(|(id, _)| id.to_string()).collect();
          path.push(dep.clone());
          cycles.push(ValidationError::Cycle { path });
        }
        Some(Color::Unvisited) => {
          color.insert(dep.as_str(), Color::InProgress);
          stack.push((dep.as_str(), 0));
        }
        _ => {}
      }
    }
  }

  cycles
}

#[cfg(test)]
mod tests {
  use super::*;
  use pipewright_config::ExecutionKind;

  fn make_step(id: &str, deps: &[&str]) -> Step {
    Step::new(id, id, ExecutionKind::Shell).depends_on(deps.iter().copied())
  }

  #[test]
  fn test_valid_dag() {
    let report = validate(&[
      make_step("install", &[]),
      make_step("lint", &["install"]),
      make_step("test", &["install"]),
      make_step("build", &["lint", "test"]),
    ]);

    assert!(report.is_valid());
    assert!(report.errors.is_empty());
  }

  #[test]
  fn test_empty_step_list_is_valid() {
    assert!(validate(&[]).is_valid());
  }

  #[test]
  fn test_two_step_cycle_names_both_steps() {
    let report = validate(&[make_step("a", &["b"]), make_step("b", &["a"])]);

    assert!(!report.is_valid());
    assert_eq!(report.errors.len(), 1);
    match &report.errors[0] {
      ValidationError::Cycle { path } => {
        assert!(path.contains(&"a".to_string()));
        assert!(path.contains(&"b".to_string()));
        assert_eq!(path.first(), path.last());
      }
      other => panic!("expected cycle, got {other:?}"),
    }

    let message = &report.messages()[0];
    assert!(message.contains('a') && message.contains('b'));
  }

  #[test]
  fn test_self_dependency_is_a_cycle() {
    let report = validate(&[make_step("a", &["a"])]);
    assert_eq!(
      report.errors,
      vec![ValidationError::Cycle {
        path: vec!["a".to_string(), "a".to_string()]
      }]
    );
  }

  #[test]
  fn test_longer_cycle_behind_valid_prefix() {
    let report = validate(&[
      make_step("root", &[]),
      make_step("x", &["root", "z"]),
      make_step("y", &["x"]),
      make_step("z", &["y"]),
    ]);

    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
      &report.errors[0],
      ValidationError::Cycle { path } if path.len() == 4 && !path.contains(&"root".to_string())
    ));
  }

  #[test]
  fn test_deep_chain_is_valid() {
    let steps: Vec<Step> = (0..50_000)
      .map(|i| {
        let id = format!("s{i}");
        let step = Step::new(&id, &id, ExecutionKind::Shell);
        if i == 0 {
          step
        } else {
          step.depends_on([format!("s{}", i - 1)])
        }
      })
      .collect();

    assert!(validate(&steps).is_valid());
  }

  #[test]
  fn test_deep_chain_closing_cycle() {
    let n = 50_000;
    let steps: Vec<Step> = (0..n)
      .map(|i| {
        let id = format!("s{i}");
        let prev = format!("s{}", (i + n - 1) % n);
        Step::new(&id, &id, ExecutionKind::Shell).depends_on([prev])
      })
      .collect();

    let report = validate(&steps);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
      &report.errors[0],
      ValidationError::Cycle { path } if path.len() == n + 1 && path.first() == path.last()
    ));
  }

  #[test]
  fn test_duplicate_ids() {
    let report = validate(&[
      make_step("a", &[]),
      make_step("a", &[]),
      make_step("a", &[]),
    ]);

    assert_eq!(
      report.errors,
      vec![ValidationError::DuplicateStepId {
        step_id: "a".to_string()
      }]
    );
  }

  #[test]
  fn test_unknown_dependency() {
    let report = validate(&[make_step("build", &["compile"])]);

    assert_eq!(
      report.errors,
      vec![ValidationError::UnknownDependency {
        step_id: "build".to_string(),
        depends_on: "compile".to_string(),
      }]
    );
  }

  #[test]
  fn test_accumulates_all_violations() {
    let report = validate(&[
      make_step("a", &["b"]),
      make_step("b", &["a"]),
      make_step("b", &[]),
      make_step("c", &["missing"]),
    ]);

    assert!(
      report
        .errors
        .iter()
        .any(|e| matches!(e, ValidationError::DuplicateStepId { .. }))
    );
    assert!(
      report
        .errors
        .iter()
        .any(|e| matches!(e, ValidationError::UnknownDependency { .. }))
    );
    assert!(
      report
        .errors
        .iter()
        .any(|e| matches!(e, ValidationError::Cycle { .. }))
    );
  }

  #[test]
  fn test_report_serializes_as_data() {
    let report = validate(&[make_step("a", &["nope"])]);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["errors"][0]["kind"], "unknown_dependency");
  }
}
