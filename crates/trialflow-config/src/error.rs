use thiserror::Error;

/// Errors raised while declaring a workflow.
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
  /// A step with the same id was already declared.
  #[error("duplicate step id: {step_id}")]
  DuplicateStep { step_id: String },

  /// A step declares the same output name twice.
  #[error("step '{step_id}' declares output '{output}' more than once")]
  DuplicateOutput { step_id: String, output: String },

  /// An input references an output that no earlier step produces.
  #[error("input '{input}' of step '{step_id}' references unknown output '{reference}'")]
  UnresolvedInput {
    step_id: String,
    input: String,
    reference: String,
  },

  /// A workflow output or lookup names an output the step does not declare.
  #[error("step '{step_id}' has no output named '{output}'")]
  UnknownOutput { step_id: String, output: String },

  /// A workflow output name was designated twice.
  #[error("duplicate workflow output: {name}")]
  DuplicateWorkflowOutput { name: String },

  /// An artifact kind string could not be parsed.
  #[error("invalid artifact kind '{0}' (expected 'dataset:<format>' or 'report:<format>')")]
  InvalidArtifactKind(String),

  /// A root input string could not be parsed.
  #[error("invalid root input '{0}' (expected a path or 'snapshot:<id>@<version>')")]
  InvalidRootInput(String),
}
