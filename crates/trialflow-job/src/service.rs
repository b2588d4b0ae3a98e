use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::spec::{JobOutputs, JobSpec};

/// Submits units of work to an execution platform.
///
/// `submit` resolves once the job has finished: with one handle per produced output
/// on success, or with the reason it was rejected or failed. Implementations must stop
/// waiting (and should stop the remote job) when `cancel` fires.
#[async_trait]
pub trait JobService: Send + Sync {
  async fn submit(&self, spec: JobSpec, cancel: CancellationToken)
  -> Result<JobOutputs, JobError>;
}
