use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::Step;
use crate::error::WorkflowError;

/// Graph structure for traversal and analysis.
///
/// Edges run from a producing step to every step consuming one of its outputs.
/// References to steps that are not part of the workflow are ignored here; they
/// are reported by [`crate::Workflow::validate`].
#[derive(Debug, Clone)]
pub struct Graph {
  /// Step ids in declaration order.
  order: Vec<String>,
  /// Declaration index of each step.
  index: HashMap<String, usize>,
  /// Adjacency list: step_id -> downstream step_ids (declaration order, deduplicated).
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> upstream step_ids (deduplicated).
  reverse_adjacency: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from steps in declaration order.
  pub fn new(steps: &[Step]) -> Self {
    let order: Vec<String> = steps.iter().map(|s| s.step_id.clone()).collect();
    let index: HashMap<String, usize> = order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.clone(), i))
      .collect();

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    // Initialize all steps
    for step_id in &order {
      adjacency.entry(step_id.clone()).or_default();
      reverse_adjacency.entry(step_id.clone()).or_default();
    }

    for step in steps {
      for reference in step.inputs.iter().filter_map(|i| i.source.artifact()) {
        if !index.contains_key(&reference.step) {
          continue;
        }
        let upstream = reverse_adjacency.entry(step.step_id.clone()).or_default();
        if !upstream.contains(&reference.step) {
          upstream.push(reference.step.clone());
          adjacency
            .entry(reference.step.clone())
            .or_default()
            .push(step.step_id.clone());
        }
      }
    }

    Self {
      order,
      index,
      adjacency,
      reverse_adjacency,
    }
  }

  /// Steps with no upstream steps, in declaration order.
  pub fn entry_points(&self) -> Vec<String> {
    self
      .order
      .iter()
      .filter(|id| self.upstream(id).is_empty())
      .cloned()
      .collect()
  }

  /// Get downstream steps for a given step.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream steps for a given step.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Declaration index of a step.
  pub fn position(&self, step_id: &str) -> Option<usize> {
    self.index.get(step_id).copied()
  }

  /// Topological order of all steps (Kahn's algorithm).
  ///
  /// Among steps whose dependencies are all satisfied, the one declared first
  /// comes first, so a workflow declared in dependency order keeps its order.
  pub fn topological_order(&self) -> Result<Vec<String>, WorkflowError> {
    let mut in_degree: Vec<usize> = self
      .order
      .iter()
      .map(|id| self.upstream(id).len())
      .collect();

    let mut ready: BTreeSet<usize> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, degree)| **degree == 0)
      .map(|(i, _)| i)
      .collect();

    let mut sorted = Vec::with_capacity(self.order.len());
    while let Some(i) = ready.pop_first() {
      let step_id = &self.order[i];
      sorted.push(step_id.clone());
      for downstream in self.downstream(step_id) {
        let j = self.index[downstream];
        in_degree[j] -= 1;
        if in_degree[j] == 0 {
          ready.insert(j);
        }
      }
    }

    if sorted.len() != self.order.len() {
      let steps = self
        .order
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] > 0)
        .map(|(_, id)| id.clone())
        .collect();
      return Err(WorkflowError::CycleDetected { steps });
    }

    Ok(sorted)
  }

  /// All steps that depend on `step_id`, directly or transitively.
  pub fn dependents(&self, step_id: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([step_id]);
    while let Some(current) = queue.pop_front() {
      for downstream in self.downstream(current) {
        if seen.insert(downstream.clone()) {
          queue.push_back(downstream);
        }
      }
    }
    seen
  }
}
