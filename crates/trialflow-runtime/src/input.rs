//! Input resolution and output checking.
//!
//! A step's input bindings become job inputs as follows:
//!
//! - `value` bindings are passed through as literals
//! - the `parameter` binding becomes the root input's literal form (the path, or
//!   `<id>@<version>` for a snapshot)
//! - `artifact` bindings are replaced by the handle the producing step returned
//!
//! Handles are never copied or rewritten; the consuming job receives exactly what
//! the producing job reported.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use trialflow_config::{ArtifactRef, InputSource, RootInput};
use trialflow_job::{ArtifactHandle, JobInput, JobInputValue, JobOutputs, JobSpec};
use trialflow_workflow::Step;

use crate::error::RuntimeError;

/// Resolve a step's inputs against the root input and the handles produced so far.
///
/// Fails with [`RuntimeError::UnresolvedInput`] on the first artifact input whose
/// handle is missing.
pub fn resolve_inputs(
  step: &Step,
  root: &RootInput,
  produced: &HashMap<ArtifactRef, ArtifactHandle>,
) -> Result<Vec<JobInput>, RuntimeError> {
  step
    .inputs
    .iter()
    .map(|input| {
      let value = match &input.source {
        InputSource::Value { value } => JobInputValue::Literal(value.clone()),
        InputSource::Parameter => JobInputValue::Literal(json!(root.as_literal())),
        InputSource::Artifact(reference) => {
          let handle = produced
            .get(reference)
            .ok_or_else(|| RuntimeError::UnresolvedInput {
              step_id: step.step_id.clone(),
              input: input.name.clone(),
              reference: reference.to_string(),
            })?;
          JobInputValue::Artifact(handle.clone())
        }
      };
      Ok(JobInput {
        name: input.name.clone(),
        value,
      })
    })
    .collect()
}

/// Build the job spec submitted for a step.
pub fn job_spec(step: &Step, execution_id: &str, inputs: Vec<JobInput>) -> JobSpec {
  JobSpec {
    execution_id: execution_id.to_string(),
    step_id: step.step_id.clone(),
    title: step.title.clone(),
    command: step.command.clone(),
    inputs,
    outputs: step.outputs.clone(),
    environment: step.environment.clone(),
    hardware_tier: step.hardware_tier.clone(),
    dataset_snapshots: step.dataset_snapshots.clone(),
  }
}

/// Check that a finished job returned a handle for every declared output.
pub fn check_outputs(step: &Step, outputs: &JobOutputs) -> Result<(), RuntimeError> {
  let returned: HashSet<&str> = outputs
    .artifacts
    .iter()
    .filter(|h| h.step_id == step.step_id)
    .map(|h| h.output.as_str())
    .collect();

  let missing: Vec<&str> = step
    .outputs
    .iter()
    .map(|o| o.name.as_str())
    .filter(|name| !returned.contains(name))
    .collect();

  if missing.is_empty() {
    Ok(())
  } else {
    Err(RuntimeError::Execution {
      step_id: step.step_id.clone(),
      message: format!(
        "job '{}' finished without declared output(s): {}",
        outputs.job_id,
        missing.join(", ")
      ),
    })
  }
}
