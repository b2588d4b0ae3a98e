use thiserror::Error;
use trialflow_workflow::WorkflowError;

/// Errors that can occur during workflow resolution.
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
  /// The workflow parameter has no name.
  #[error("workflow '{workflow_id}' declares a parameter with an empty name")]
  EmptyParameterName { workflow_id: String },

  /// The resolved workflow failed structural validation.
  #[error("invalid workflow: {0}")]
  InvalidWorkflow(#[from] WorkflowError),
}
