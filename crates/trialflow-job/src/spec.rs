//! Job descriptions and result types.

use std::fmt;

use serde::{Deserialize, Serialize};
use trialflow_config::{ArtifactKind, DatasetSnapshotRef, OutputDef};

/// Opaque reference to a file produced by a step.
///
/// `locator` is whatever the platform uses to find the file again (a path, a URI, a
/// blob id); it is never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle {
  pub step_id: String,
  pub output: String,
  pub kind: ArtifactKind,
  pub locator: String,
}

impl fmt::Display for ArtifactHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{} ({}) -> {}", self.step_id, self.output, self.kind, self.locator)
  }
}

/// The value of a job input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobInputValue {
  Literal(serde_json::Value),
  Artifact(ArtifactHandle),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
  pub name: String,
  #[serde(flatten)]
  pub value: JobInputValue,
}

/// Everything the platform needs to run one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
  /// Execution this job belongs to.
  pub execution_id: String,
  pub step_id: String,
  pub title: String,
  pub command: String,
  pub inputs: Vec<JobInput>,
  pub outputs: Vec<OutputDef>,
  pub environment: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub hardware_tier: Option<String>,
  pub dataset_snapshots: Vec<DatasetSnapshotRef>,
}

impl JobSpec {
  pub fn get_input(&self, name: &str) -> Option<&JobInputValue> {
    self.inputs.iter().find(|i| i.name == name).map(|i| &i.value)
  }

  /// Artifact handles this job consumes, in input order.
  pub fn artifact_inputs(&self) -> impl Iterator<Item = &ArtifactHandle> {
    self.inputs.iter().filter_map(|i| match &i.value {
      JobInputValue::Artifact(handle) => Some(handle),
      JobInputValue::Literal(_) => None,
    })
  }
}

/// Handles produced by a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutputs {
  pub job_id: String,
  pub artifacts: Vec<ArtifactHandle>,
}
