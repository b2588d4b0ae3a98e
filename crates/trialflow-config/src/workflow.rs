use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::step::StepDef;

/// The single external parameter a workflow is invoked with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
  /// Parameter name, e.g. `sdtm_dataset_snapshot`.
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

impl ParameterSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: None,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}

/// A step output designated as a return value of the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutputDef {
  pub name: String,
  pub from: ArtifactRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  pub parameter: ParameterSpec,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  pub steps: Vec<StepDef>,
  #[serde(default)]
  pub outputs: Vec<WorkflowOutputDef>,
}
