use trialflow_config::{InputSource, ProjectDefaults, StepDef, WorkflowDef};
use trialflow_workflow::{Step, Workflow};
use tracing::{debug, warn};

use crate::error::ResolveError;

/// Resolver transforms a WorkflowDef into a locked Workflow.
pub trait Resolver: Send + Sync {
  /// Resolve a workflow definition into a locked workflow.
  ///
  /// This process:
  /// 1. Applies project defaults to settings a step leaves unset
  /// 2. Validates the graph structure (references, duplicates, cycles)
  /// 3. Returns the locked workflow, ready for submission
  fn resolve(&self, def: WorkflowDef) -> Result<Workflow, ResolveError>;
}

/// Standard resolver implementation backed by project defaults.
pub struct StandardResolver {
  defaults: ProjectDefaults,
}

impl StandardResolver {
  /// Create a new resolver with the given project defaults.
  pub fn new(defaults: ProjectDefaults) -> Self {
    Self { defaults }
  }

  pub fn defaults(&self) -> &ProjectDefaults {
    &self.defaults
  }

  /// Lock a single step, filling omitted settings from the defaults.
  fn resolve_step(&self, def: StepDef) -> Step {
    let environment = def
      .environment
      .or_else(|| self.defaults.environment.clone())
      .unwrap_or_default();
    let hardware_tier = def
      .hardware_tier
      .or_else(|| self.defaults.hardware_tier.clone());
    let dataset_snapshots = def
      .dataset_snapshots
      .unwrap_or_else(|| self.defaults.dataset_snapshots.clone());

    Step {
      title: def.title.unwrap_or_else(|| def.step_id.clone()),
      step_id: def.step_id,
      command: def.command,
      inputs: def.inputs,
      outputs: def.outputs,
      environment,
      hardware_tier,
      dataset_snapshots,
      timeout_ms: def.timeout_ms,
    }
  }
}

impl Default for StandardResolver {
  fn default() -> Self {
    Self::new(ProjectDefaults::default())
  }
}

impl Resolver for StandardResolver {
  fn resolve(&self, def: WorkflowDef) -> Result<Workflow, ResolveError> {
    if def.parameter.name.trim().is_empty() {
      return Err(ResolveError::EmptyParameterName {
        workflow_id: def.workflow_id,
      });
    }

    let uses_parameter = def.steps.iter().any(|s| {
      s.inputs
        .iter()
        .any(|i| matches!(i.source, InputSource::Parameter))
    });
    if !uses_parameter {
      warn!(
        workflow_id = %def.workflow_id,
        parameter = %def.parameter.name,
        "no step consumes the workflow parameter"
      );
    }

    let workflow = Workflow {
      workflow_id: def.workflow_id,
      name: def.name,
      parameter: def.parameter,
      steps: def
        .steps
        .into_iter()
        .map(|s| self.resolve_step(s))
        .collect(),
      outputs: def.outputs,
      timeout_ms: def.timeout_ms,
    };

    workflow.validate()?;

    debug!(
      workflow_id = %workflow.workflow_id,
      steps = workflow.steps.len(),
      "workflow resolved"
    );

    Ok(workflow)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use trialflow_config::clinical::{TemplateOptions, adam_tfl_template};
  use trialflow_config::{DatasetSnapshotRef, ParameterSpec};
  use trialflow_workflow::WorkflowError;

  fn defaults() -> ProjectDefaults {
    ProjectDefaults {
      environment: Some("SAS Analytics Pro".to_string()),
      hardware_tier: Some("Medium".to_string()),
      dataset_snapshots: vec![DatasetSnapshotRef::new("meta", 3)],
    }
  }

  fn def_from_json(value: serde_json::Value) -> WorkflowDef {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_resolve_applies_defaults() {
    let def = def_from_json(json!({
      "workflow_id": "adam",
      "name": "ADaM",
      "parameter": { "name": "sdtm_data_path" },
      "steps": [
        {
          "step_id": "adsl",
          "command": "prod/adam_flows/ADSL.sas",
          "inputs": [{ "name": "sdtm_data_path", "source": "parameter" }],
          "outputs": [{ "name": "adsl", "kind": "dataset:sas7bdat" }]
        },
        {
          "step_id": "adae",
          "title": "Create ADAE Dataset",
          "command": "prod/adam_flows/ADAE.sas",
          "environment": "SAS 9.4",
          "hardware_tier": "Large",
          "dataset_snapshots": [],
          "inputs": [
            { "name": "sdtm_data_path", "source": "parameter" },
            { "name": "adsl", "source": "artifact", "step": "adsl", "output": "adsl" }
          ],
          "outputs": [{ "name": "adae", "kind": "dataset:sas7bdat" }]
        }
      ]
    }));

    let workflow = StandardResolver::new(defaults()).resolve(def).unwrap();

    let adsl = workflow.get_step("adsl").unwrap();
    assert_eq!(adsl.title, "adsl");
    assert_eq!(adsl.environment, "SAS Analytics Pro");
    assert_eq!(adsl.hardware_tier.as_deref(), Some("Medium"));
    assert_eq!(adsl.dataset_snapshots, vec![DatasetSnapshotRef::new("meta", 3)]);

    let adae = workflow.get_step("adae").unwrap();
    assert_eq!(adae.title, "Create ADAE Dataset");
    assert_eq!(adae.environment, "SAS 9.4");
    assert_eq!(adae.hardware_tier.as_deref(), Some("Large"));
    assert!(adae.dataset_snapshots.is_empty());
  }

  #[test]
  fn test_resolve_without_environment_fails() {
    let def = def_from_json(json!({
      "workflow_id": "adam",
      "name": "ADaM",
      "parameter": { "name": "root" },
      "steps": [{
        "step_id": "adsl",
        "command": "prod/adam_flows/ADSL.sas",
        "outputs": [{ "name": "adsl", "kind": "dataset:sas7bdat" }]
      }]
    }));

    let err = StandardResolver::default().resolve(def).unwrap_err();
    assert_eq!(
      err,
      ResolveError::InvalidWorkflow(WorkflowError::MissingEnvironment {
        step_id: "adsl".to_string()
      })
    );
  }

  #[test]
  fn test_resolve_rejects_unresolved_reference() {
    let def = def_from_json(json!({
      "workflow_id": "adam",
      "name": "ADaM",
      "parameter": { "name": "root" },
      "steps": [{
        "step_id": "adae",
        "command": "prod/adam_flows/ADAE.sas",
        "environment": "SAS Analytics Pro",
        "inputs": [{ "name": "adsl", "source": "artifact", "step": "adsl", "output": "adsl" }],
        "outputs": [{ "name": "adae", "kind": "dataset:sas7bdat" }]
      }]
    }));

    let err = StandardResolver::default().resolve(def).unwrap_err();
    assert!(matches!(
      err,
      ResolveError::InvalidWorkflow(WorkflowError::UnresolvedInput { .. })
    ));
  }

  #[test]
  fn test_resolve_rejects_empty_parameter() {
    let mut def = adam_tfl_template(&TemplateOptions::minimal()).unwrap();
    def.parameter = ParameterSpec::new(" ");

    let err = StandardResolver::default().resolve(def).unwrap_err();
    assert!(matches!(err, ResolveError::EmptyParameterName { .. }));
  }

  #[test]
  fn test_resolve_full_template() {
    let def = adam_tfl_template(&TemplateOptions::full()).unwrap();
    let workflow = StandardResolver::default().resolve(def).unwrap();

    assert_eq!(workflow.steps.len(), 7);
    let order: Vec<&str> = workflow
      .submission_order()
      .unwrap()
      .iter()
      .map(|s| s.step_id.as_str())
      .collect();
    assert_eq!(order, ["adsl", "adae", "adcm", "adlb", "admh", "advs", "t_pop"]);
  }
}
