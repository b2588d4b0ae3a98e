use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
  #[error("workflow has no steps")]
  EmptyWorkflow,

  #[error("step not found: {0}")]
  StepNotFound(String),

  #[error("duplicate step id: {step_id}")]
  DuplicateStep { step_id: String },

  #[error("step '{step_id}' declares output '{output}' more than once")]
  DuplicateOutput { step_id: String, output: String },

  #[error("step '{step_id}' has no command")]
  MissingCommand { step_id: String },

  #[error("step '{step_id}' has no environment and no project default is set")]
  MissingEnvironment { step_id: String },

  /// An input references an output that no step in the workflow declares.
  #[error("input '{input}' of step '{step_id}' references unknown output '{reference}'")]
  UnresolvedInput {
    step_id: String,
    input: String,
    reference: String,
  },

  #[error("cycle detected between steps: {}", .steps.join(", "))]
  CycleDetected { steps: Vec<String> },

  #[error("workflow output '{name}' references unknown output '{reference}'")]
  UnknownWorkflowOutput { name: String, reference: String },

  #[error("duplicate workflow output: {name}")]
  DuplicateWorkflowOutput { name: String },
}
