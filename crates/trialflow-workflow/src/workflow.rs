use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use trialflow_config::{DatasetSnapshotRef, InputDef, OutputDef, ParameterSpec, WorkflowOutputDef};

use crate::error::WorkflowError;
use crate::graph::Graph;

/// A resolved step: project defaults applied, ready to be turned into a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub step_id: String,
  pub title: String,
  pub command: String,
  pub inputs: Vec<InputDef>,
  pub outputs: Vec<OutputDef>,
  pub environment: String,
  pub hardware_tier: Option<String>,
  pub dataset_snapshots: Vec<DatasetSnapshotRef>,
  pub timeout_ms: Option<u64>,
}

impl Step {
  pub fn get_output(&self, name: &str) -> Option<&OutputDef> {
    self.outputs.iter().find(|o| o.name == name)
  }

  #[cfg(test)]
  pub(crate) fn for_test(step_id: &str, inputs: Vec<InputDef>) -> Self {
    use trialflow_config::ArtifactKind;

    Self {
      step_id: step_id.to_string(),
      title: step_id.to_string(),
      command: format!("prod/{}.sas", step_id),
      inputs,
      outputs: vec![OutputDef::new(step_id, ArtifactKind::dataset("sas7bdat"))],
      environment: "SAS Analytics Pro".to_string(),
      hardware_tier: None,
      dataset_snapshots: Vec::new(),
      timeout_ms: None,
    }
  }
}

/// A locked workflow ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub parameter: ParameterSpec,
  /// Steps in declaration order.
  pub steps: Vec<Step>,
  pub outputs: Vec<WorkflowOutputDef>,
  pub timeout_ms: Option<u64>,
}

impl Workflow {
  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.steps)
  }

  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.step_id == step_id)
  }

  /// Steps in the order they must be submitted.
  pub fn submission_order(&self) -> Result<Vec<&Step>, WorkflowError> {
    let order = self.graph().topological_order()?;
    order
      .iter()
      .map(|id| {
        self
          .get_step(id)
          .ok_or_else(|| WorkflowError::StepNotFound(id.clone()))
      })
      .collect()
  }

  /// Validate the workflow structure.
  ///
  /// Checks, in order: non-empty, unique step ids and output names, commands and
  /// environments present, every artifact input names an output of a step declared
  /// before it, designated workflow outputs exist and are unique, and the graph is
  /// acyclic.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    if self.steps.is_empty() {
      return Err(WorkflowError::EmptyWorkflow);
    }

    // step_id -> declared output names, for the steps seen so far
    let mut declared: HashMap<&str, HashSet<&str>> = HashMap::new();
    for step in &self.steps {
      for input in &step.inputs {
        let Some(reference) = input.source.artifact() else {
          continue;
        };
        let resolves = declared
          .get(reference.step.as_str())
          .is_some_and(|outputs| outputs.contains(reference.output.as_str()));
        if !resolves {
          return Err(WorkflowError::UnresolvedInput {
            step_id: step.step_id.clone(),
            input: input.name.clone(),
            reference: reference.to_string(),
          });
        }
      }

      let mut names = HashSet::new();
      for output in &step.outputs {
        if !names.insert(output.name.as_str()) {
          return Err(WorkflowError::DuplicateOutput {
            step_id: step.step_id.clone(),
            output: output.name.clone(),
          });
        }
      }
      if declared.insert(step.step_id.as_str(), names).is_some() {
        return Err(WorkflowError::DuplicateStep {
          step_id: step.step_id.clone(),
        });
      }
      if step.command.trim().is_empty() {
        return Err(WorkflowError::MissingCommand {
          step_id: step.step_id.clone(),
        });
      }
      if step.environment.trim().is_empty() {
        return Err(WorkflowError::MissingEnvironment {
          step_id: step.step_id.clone(),
        });
      }
    }

    let is_declared = |step: &str, output: &str| {
      declared
        .get(step)
        .is_some_and(|outputs| outputs.contains(output))
    };

    let mut output_names = HashSet::new();
    for output in &self.outputs {
      if !is_declared(&output.from.step, &output.from.output) {
        return Err(WorkflowError::UnknownWorkflowOutput {
          name: output.name.clone(),
          reference: output.from.to_string(),
        });
      }
      if !output_names.insert(output.name.as_str()) {
        return Err(WorkflowError::DuplicateWorkflowOutput {
          name: output.name.clone(),
        });
      }
    }

    self.graph().topological_order()?;
    Ok(())
  }
}
