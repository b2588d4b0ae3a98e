use std::fmt;

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactKind, ArtifactRef};
use crate::input::InputDef;

/// An immutable point-in-time view of a dataset collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetSnapshotRef {
  pub id: String,
  pub version: u32,
}

impl DatasetSnapshotRef {
  pub fn new(id: impl Into<String>, version: u32) -> Self {
    Self {
      id: id.into(),
      version,
    }
  }
}

impl fmt::Display for DatasetSnapshotRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.id, self.version)
  }
}

/// An output a step is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
  pub name: String,
  pub kind: ArtifactKind,
}

impl OutputDef {
  pub fn new(name: impl Into<String>, kind: ArtifactKind) -> Self {
    Self {
      name: name.into(),
      kind,
    }
  }
}

/// A single batch job in a workflow.
///
/// Omitted `environment`, `hardware_tier` and `dataset_snapshots` are filled in from
/// the project defaults during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  /// Human readable title, e.g. "Create ADSL Dataset".
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  /// Path of the analysis script, relative to the project root.
  pub command: String,
  #[serde(default)]
  pub inputs: Vec<InputDef>,
  pub outputs: Vec<OutputDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hardware_tier: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dataset_snapshots: Option<Vec<DatasetSnapshotRef>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl StepDef {
  /// Upstream references of this step, in input order.
  pub fn artifact_inputs(&self) -> impl Iterator<Item = (&str, &ArtifactRef)> {
    self
      .inputs
      .iter()
      .filter_map(|input| input.source.artifact().map(|r| (input.name.as_str(), r)))
  }

  pub fn get_output(&self, name: &str) -> Option<&OutputDef> {
    self.outputs.iter().find(|o| o.name == name)
  }
}
