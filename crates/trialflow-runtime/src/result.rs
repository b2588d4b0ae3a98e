//! Execution result types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use trialflow_job::{ArtifactHandle, JobInput};

/// Result of a single step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
  pub step_id: String,
  /// Job id assigned by the execution service.
  pub job_id: String,
  /// Inputs as submitted, with artifact references replaced by handles.
  pub inputs: Vec<JobInput>,
  /// One handle per declared output.
  pub outputs: Vec<ArtifactHandle>,
}

impl StepResult {
  pub fn get_output(&self, name: &str) -> Option<&ArtifactHandle> {
    self.outputs.iter().find(|h| h.output == name)
  }
}

/// Result of a complete workflow invocation.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeResult {
  /// Unique execution ID.
  pub execution_id: String,
  /// Designated workflow outputs, keyed by output name.
  pub outputs: HashMap<String, ArtifactHandle>,
  /// Results of all executed steps, keyed by step_id.
  pub step_results: HashMap<String, StepResult>,
}
