use std::collections::{HashMap, HashSet, VecDeque};

use pipewright_config::Step;

/// Dependency graph over step ids.
///
/// Edges point from a step to the steps it depends on (upstream) and, in
/// reverse, to the steps that depend on it (downstream). Neighbour lists keep
/// declaration order. Dependencies on unknown ids are dropped.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  /// Step ids in declaration order (first occurrence wins on duplicates).
  order: Vec<String>,
  /// step_id -> ids it depends on.
  upstream: HashMap<String, Vec<String>>,
  /// step_id -> ids that depend on it.
  downstream: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from a step list.
  pub fn new(steps: &[Step]) -> Self {
    let mut order = Vec::with_capacity(steps.len());
    let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
    let mut downstream: HashMap<String, Vec<String>> = HashMap::new();

    for step in steps {
      if upstream.contains_key(&step.id) {
        continue;
      }
      order.push(step.id.clone());
      upstream.insert(step.id.clone(), Vec::new());
      downstream.insert(step.id.clone(), Vec::new());
    }

    let mut seen = HashSet::new();
    for step in steps {
      if !seen.insert(step.id.as_str()) {
        continue;
      }
      for dep in &step.depends_on {
        if !upstream.contains_key(dep) {
          continue;
        }
        if let Some(ups) = upstream.get_mut(&step.id)
          && !ups.contains(dep)
        {
          ups.push(dep.clone());
          downstream
            .entry(dep.clone())
            .or_default()
            .push(step.id.clone());
        }
      }
    }

    Self {
      order,
      upstream,
      downstream,
    }
  }

  /// Step ids in declaration order.
  pub fn step_ids(&self) -> &[String] {
    &self.order
  }

  pub fn contains(&self, step_id: &str) -> bool {
    self.upstream.contains_key(step_id)
  }

  /// Steps that `step_id` depends on.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .upstream
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Steps that depend on `step_id`.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .downstream
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every step that depends on `step_id` directly or indirectly, in
  /// breadth-first order. Does not include `step_id` itself.
  pub fn transitive_dependents(&self, step_id: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    visited.insert(step_id);
    queue.push_back(step_id);

    while let Some(current) = queue.pop_front() {
      for next in self.downstream(current) {
        if visited.insert(next.as_str()) {
          result.push(next.clone());
          queue.push_back(next.as_str());
        }
      }
    }

    result
  }

  /// Steps with no dependencies.
  pub fn entry_points(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|id| self.upstream(id).is_empty())
      .map(|id| id.as_str())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pipewright_config::ExecutionKind;

  fn make_step(id: &str, deps: &[&str]) -> Step {
    Step::new(id, id, ExecutionKind::Shell).depends_on(deps.iter().copied())
  }

  #[test]
  fn test_upstream_and_downstream() {
    let graph = Graph::new(&[
      make_step("install", &[]),
      make_step("lint", &["install"]),
      make_step("test", &["install"]),
    ]);

    assert_eq!(graph.upstream("lint"), &["install".to_string()]);
    assert_eq!(
      graph.downstream("install"),
      &["lint".to_string(), "test".to_string()]
    );
    assert_eq!(graph.entry_points(), vec!["install"]);
  }

  #[test]
  fn test_transitive_dependents() {
    let graph = Graph::new(&[
      make_step("a", &[]),
      make_step("b", &["a"]),
      make_step("c", &["b"]),
      make_step("d", &[]),
    ]);

    assert_eq!(graph.transitive_dependents("a"), vec!["b", "c"]);
    assert!(graph.transitive_dependents("d").is_empty());
  }

  #[test]
  fn test_unknown_dependencies_are_dropped() {
    let graph = Graph::new(&[make_step("a", &["ghost"])]);
    assert!(graph.upstream("a").is_empty());
    assert!(!graph.contains("ghost"));
  }
}
