//! Runtime error types.

use trialflow_job::{ArtifactHandle, JobError};
use trialflow_workflow::WorkflowError;

/// Errors that can occur during runtime execution.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RuntimeError {
  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  /// Invalid workflow graph structure.
  #[error("invalid graph: {0}")]
  InvalidGraph(#[from] WorkflowError),

  /// The requested step is not part of the workflow.
  #[error("step '{0}' not found in workflow")]
  StepNotFound(String),

  /// An artifact input had no handle when the step was about to be submitted.
  #[error(
    "input '{input}' of step '{step_id}' references '{reference}', which has not been produced"
  )]
  UnresolvedInput {
    step_id: String,
    input: String,
    reference: String,
  },

  /// The job service did not accept the step.
  #[error("submission of step '{step_id}' failed: {source}")]
  Submission {
    step_id: String,
    #[source]
    source: JobError,
  },

  /// The job was accepted but failed, or finished without all declared outputs.
  #[error("execution of step '{step_id}' failed: {message}")]
  Execution { step_id: String, message: String },

  /// A step ran longer than its timeout.
  #[error("step '{step_id}' timed out after {timeout_ms}ms")]
  Timeout { step_id: String, timeout_ms: u64 },

  /// The whole run ran longer than the workflow timeout.
  #[error("workflow timed out after {timeout_ms}ms")]
  WorkflowTimeout { timeout_ms: u64 },

  /// One or more steps failed while independent steps were allowed to continue.
  #[error("{} step(s) failed, {} skipped", .failures.len(), .skipped.len())]
  StepsFailed {
    /// Step failures, in the order they were observed.
    failures: Vec<RuntimeError>,
    /// Steps never submitted because something they depend on failed.
    skipped: Vec<String>,
    /// Handles produced by steps that succeeded; the run does not return them.
    orphaned: Vec<ArtifactHandle>,
  },

  /// A submission task panicked or was aborted.
  #[error("task join error: {message}")]
  TaskJoin { message: String },
}

impl RuntimeError {
  /// Map a job service error onto the step that submitted it.
  pub fn from_job(step_id: impl Into<String>, error: JobError) -> Self {
    let step_id = step_id.into();
    match error {
      JobError::Cancelled => Self::Cancelled,
      JobError::Failed { .. } | JobError::InvalidResponse { .. } => Self::Execution {
        step_id,
        message: error.to_string(),
      },
      JobError::Rejected { .. } | JobError::Transport { .. } | JobError::InvalidConfig { .. } => {
        Self::Submission {
          step_id,
          source: error,
        }
      }
    }
  }

  /// The step this error belongs to, if it belongs to one.
  pub fn step_id(&self) -> Option<&str> {
    match self {
      Self::UnresolvedInput { step_id, .. }
      | Self::Submission { step_id, .. }
      | Self::Execution { step_id, .. }
      | Self::Timeout { step_id, .. } => Some(step_id),
      Self::StepNotFound(step_id) => Some(step_id),
      _ => None,
    }
  }
}
