//! Job submission error types.

/// Errors reported by a [`crate::JobService`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
  /// The service refused the job (unknown environment, missing snapshot,
  /// invalid command path, ...).
  #[error("job rejected: {message}")]
  Rejected { message: String },

  /// The job was accepted but finished unsuccessfully.
  #[error("job '{job_id}' finished with status '{status}': {message}")]
  Failed {
    job_id: String,
    status: String,
    message: String,
  },

  /// The service could not be reached.
  #[error("transport error: {message}")]
  Transport { message: String },

  /// The service answered with something we could not interpret.
  #[error("invalid service response: {message}")]
  InvalidResponse { message: String },

  /// The client is misconfigured.
  #[error("invalid service configuration: {message}")]
  InvalidConfig { message: String },

  /// The submission was cancelled by the caller.
  #[error("job cancelled")]
  Cancelled,
}

impl JobError {
  pub fn rejected(message: impl Into<String>) -> Self {
    Self::Rejected {
      message: message.into(),
    }
  }

  pub fn failed(
    job_id: impl Into<String>,
    status: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self::Failed {
      job_id: job_id.into(),
      status: status.into(),
      message: message.into(),
    }
  }
}
