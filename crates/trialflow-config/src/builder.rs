//! Programmatic workflow construction.
//!
//! [`WorkflowBuilder`] checks every binding as the step is declared, so a step can
//! only consume outputs of steps declared before it.
//!
//! ```
//! use trialflow_config::{ArtifactKind, ParameterSpec, StepSpec, WorkflowBuilder};
//!
//! let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
//! let adsl = builder
//!   .step(
//!     StepSpec::new("adsl", "prod/adam_flows/ADSL.sas")
//!       .input_parameter("sdtm_data_path")
//!       .output("adsl", ArtifactKind::dataset("sas7bdat")),
//!   )
//!   .unwrap();
//! builder.output("adsl", adsl.get("adsl").unwrap()).unwrap();
//! let def = builder.build();
//! assert_eq!(def.steps.len(), 1);
//! ```

use std::collections::{HashMap, HashSet};

use crate::artifact::{ArtifactKind, ArtifactRef};
use crate::error::DefinitionError;
use crate::input::{InputDef, InputSource};
use crate::step::{DatasetSnapshotRef, OutputDef, StepDef};
use crate::workflow::{ParameterSpec, WorkflowDef, WorkflowOutputDef};

/// Description of a step to append to a [`WorkflowBuilder`].
#[derive(Debug, Clone)]
pub struct StepSpec {
  def: StepDef,
}

impl StepSpec {
  pub fn new(step_id: impl Into<String>, command: impl Into<String>) -> Self {
    Self {
      def: StepDef {
        step_id: step_id.into(),
        title: None,
        command: command.into(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        environment: None,
        hardware_tier: None,
        dataset_snapshots: None,
        timeout_ms: None,
      },
    }
  }

  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.def.title = Some(title.into());
    self
  }

  /// Bind an input to the workflow parameter.
  pub fn input_parameter(mut self, name: impl Into<String>) -> Self {
    self
      .def
      .inputs
      .push(InputDef::new(name, InputSource::Parameter));
    self
  }

  /// Bind an input to a literal value.
  pub fn input_value(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.def.inputs.push(InputDef::new(
      name,
      InputSource::Value {
        value: value.into(),
      },
    ));
    self
  }

  /// Bind an input to an output of an earlier step.
  pub fn input_artifact(mut self, name: impl Into<String>, reference: &ArtifactRef) -> Self {
    self.def.inputs.push(InputDef::new(
      name,
      InputSource::Artifact(reference.clone()),
    ));
    self
  }

  pub fn output(mut self, name: impl Into<String>, kind: ArtifactKind) -> Self {
    self.def.outputs.push(OutputDef::new(name, kind));
    self
  }

  pub fn environment(mut self, environment: impl Into<String>) -> Self {
    self.def.environment = Some(environment.into());
    self
  }

  pub fn hardware_tier(mut self, tier: impl Into<String>) -> Self {
    self.def.hardware_tier = Some(tier.into());
    self
  }

  pub fn dataset_snapshot(mut self, snapshot: DatasetSnapshotRef) -> Self {
    self
      .def
      .dataset_snapshots
      .get_or_insert_with(Vec::new)
      .push(snapshot);
    self
  }

  pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.def.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn into_def(self) -> StepDef {
    self.def
  }
}

/// Handles to the outputs a declared step will produce.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutputs {
  step_id: String,
  outputs: Vec<ArtifactRef>,
}

impl StepOutputs {
  pub fn step_id(&self) -> &str {
    &self.step_id
  }

  /// Look up a declared output by name.
  pub fn get(&self, name: &str) -> Result<&ArtifactRef, DefinitionError> {
    self
      .outputs
      .iter()
      .find(|r| r.output == name)
      .ok_or_else(|| DefinitionError::UnknownOutput {
        step_id: self.step_id.clone(),
        output: name.to_string(),
      })
  }

  pub fn iter(&self) -> impl Iterator<Item = &ArtifactRef> {
    self.outputs.iter()
  }
}

/// Incrementally declares a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
  workflow_id: String,
  name: String,
  parameter: ParameterSpec,
  timeout_ms: Option<u64>,
  steps: Vec<StepDef>,
  outputs: Vec<WorkflowOutputDef>,
  /// step_id -> declared output names
  declared: HashMap<String, HashSet<String>>,
}

impl WorkflowBuilder {
  /// Start a workflow taking a single parameter.
  ///
  /// The workflow id is derived from the name (lowercased, non-alphanumerics
  /// replaced with `-`); use [`WorkflowBuilder::with_id`] to set it explicitly.
  pub fn new(name: impl Into<String>, parameter: ParameterSpec) -> Self {
    let name = name.into();
    Self {
      workflow_id: slugify(&name),
      name,
      parameter,
      timeout_ms: None,
      steps: Vec::new(),
      outputs: Vec::new(),
      declared: HashMap::new(),
    }
  }

  pub fn with_id(mut self, workflow_id: impl Into<String>) -> Self {
    self.workflow_id = workflow_id.into();
    self
  }

  /// Bound the whole run.
  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn parameter(&self) -> &ParameterSpec {
    &self.parameter
  }

  /// Declare a step and get back references to its outputs.
  ///
  /// Fails if the id is taken, an output name repeats, or an artifact input
  /// points at an output no earlier step declares.
  pub fn step(&mut self, spec: StepSpec) -> Result<StepOutputs, DefinitionError> {
    let def = spec.into_def();

    if self.declared.contains_key(&def.step_id) {
      return Err(DefinitionError::DuplicateStep {
        step_id: def.step_id,
      });
    }

    let mut names = HashSet::new();
    for output in &def.outputs {
      if !names.insert(output.name.clone()) {
        return Err(DefinitionError::DuplicateOutput {
          step_id: def.step_id.clone(),
          output: output.name.clone(),
        });
      }
    }

    for (input, reference) in def.artifact_inputs() {
      let known = self
        .declared
        .get(&reference.step)
        .is_some_and(|outputs| outputs.contains(&reference.output));
      if !known {
        return Err(DefinitionError::UnresolvedInput {
          step_id: def.step_id.clone(),
          input: input.to_string(),
          reference: reference.to_string(),
        });
      }
    }

    let outputs = StepOutputs {
      step_id: def.step_id.clone(),
      outputs: def
        .outputs
        .iter()
        .map(|o| ArtifactRef::new(&def.step_id, &o.name))
        .collect(),
    };

    self.declared.insert(def.step_id.clone(), names);
    self.steps.push(def);
    Ok(outputs)
  }

  /// Designate a step output as a workflow return value.
  pub fn output(
    &mut self,
    name: impl Into<String>,
    reference: &ArtifactRef,
  ) -> Result<(), DefinitionError> {
    let name = name.into();
    let known = self
      .declared
      .get(&reference.step)
      .is_some_and(|outputs| outputs.contains(&reference.output));
    if !known {
      return Err(DefinitionError::UnknownOutput {
        step_id: reference.step.clone(),
        output: reference.output.clone(),
      });
    }
    if self.outputs.iter().any(|o| o.name == name) {
      return Err(DefinitionError::DuplicateWorkflowOutput { name });
    }
    self.outputs.push(WorkflowOutputDef {
      name,
      from: reference.clone(),
    });
    Ok(())
  }

  pub fn build(self) -> WorkflowDef {
    WorkflowDef {
      workflow_id: self.workflow_id,
      name: self.name,
      parameter: self.parameter,
      timeout_ms: self.timeout_ms,
      steps: self.steps,
      outputs: self.outputs,
    }
  }
}

fn slugify(name: &str) -> String {
  let mut slug = String::with_capacity(name.len());
  for c in name.chars() {
    if c.is_ascii_alphanumeric() {
      slug.push(c.to_ascii_lowercase());
    } else if !slug.ends_with('-') {
      slug.push('-');
    }
  }
  slug.trim_matches('-').to_string()
}
