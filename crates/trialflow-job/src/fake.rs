//! In-memory job service.
//!
//! Every declared output of a successful job gets a deterministic handle with the
//! locator `fake://<execution_id>/<step_id>/<output>.<format>`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::JobError;
use crate::service::JobService;
use crate::spec::{ArtifactHandle, JobOutputs, JobSpec};

/// Scripted outcome for a step.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeBehavior {
  /// Produce every declared output immediately.
  Succeed,
  /// Wait, then produce every declared output.
  Delay(Duration),
  /// Refuse the submission.
  Reject(String),
  /// Accept the job, then report it failed.
  Fail(String),
  /// Succeed but leave out the named output.
  OmitOutput(String),
  /// Never finish; only cancellation ends the call.
  Hang,
}

/// A [`JobService`] that runs nothing and records everything.
#[derive(Debug, Default)]
pub struct FakeJobService {
  behaviors: Mutex<HashMap<String, FakeBehavior>>,
  submissions: Mutex<Vec<JobSpec>>,
  cancelled: Mutex<Vec<String>>,
  job_counter: AtomicU64,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
}

impl FakeJobService {
  pub fn new() -> Self {
    Self::default()
  }

  /// Script the outcome of every job submitted for `step_id`.
  pub fn with_behavior(self, step_id: impl Into<String>, behavior: FakeBehavior) -> Self {
    self.set_behavior(step_id, behavior);
    self
  }

  pub fn set_behavior(&self, step_id: impl Into<String>, behavior: FakeBehavior) {
    let mut behaviors = self.behaviors.lock().unwrap_or_else(|e| e.into_inner());
    behaviors.insert(step_id.into(), behavior);
  }

  /// Every job submitted so far, in submission order.
  pub fn submissions(&self) -> Vec<JobSpec> {
    self
      .submissions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  /// Step ids of every job submitted so far, in submission order.
  pub fn submitted_steps(&self) -> Vec<String> {
    self
      .submissions()
      .into_iter()
      .map(|s| s.step_id)
      .collect()
  }

  /// Step ids of the jobs that ended because their token was cancelled.
  pub fn cancelled_steps(&self) -> Vec<String> {
    self
      .cancelled
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  /// Number of jobs running right now.
  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  /// The highest number of jobs that were running at the same time.
  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  fn record_cancelled(&self, step_id: &str) -> JobError {
    self
      .cancelled
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(step_id.to_string());
    JobError::Cancelled
  }

  fn behavior_for(&self, step_id: &str) -> FakeBehavior {
    self
      .behaviors
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(step_id)
      .cloned()
      .unwrap_or(FakeBehavior::Succeed)
  }

  fn handles(spec: &JobSpec, omit: Option<&str>) -> Vec<ArtifactHandle> {
    spec
      .outputs
      .iter()
      .filter(|o| Some(o.name.as_str()) != omit)
      .map(|o| ArtifactHandle {
        step_id: spec.step_id.clone(),
        output: o.name.clone(),
        kind: o.kind.clone(),
        locator: format!(
          "fake://{}/{}/{}.{}",
          spec.execution_id,
          spec.step_id,
          o.name,
          o.kind.format()
        ),
      })
      .collect()
  }

  async fn run(
    &self,
    spec: &JobSpec,
    behavior: FakeBehavior,
    job_id: String,
    cancel: CancellationToken,
  ) -> Result<JobOutputs, JobError> {
    match behavior {
      FakeBehavior::Succeed => Ok(JobOutputs {
        job_id,
        artifacts: Self::handles(spec, None),
      }),
      FakeBehavior::Delay(delay) => {
        tokio::select! {
          _ = tokio::time::sleep(delay) => Ok(JobOutputs {
            job_id,
            artifacts: Self::handles(spec, None),
          }),
          _ = cancel.cancelled() => Err(self.record_cancelled(&spec.step_id)),
        }
      }
      FakeBehavior::Reject(message) => Err(JobError::rejected(message)),
      FakeBehavior::Fail(message) => Err(JobError::failed(job_id, "failed", message)),
      FakeBehavior::OmitOutput(output) => Ok(JobOutputs {
        job_id,
        artifacts: Self::handles(spec, Some(&output)),
      }),
      FakeBehavior::Hang => {
        cancel.cancelled().await;
        Err(self.record_cancelled(&spec.step_id))
      }
    }
  }
}

#[async_trait]
impl JobService for FakeJobService {
  async fn submit(
    &self,
    spec: JobSpec,
    cancel: CancellationToken,
  ) -> Result<JobOutputs, JobError> {
    self
      .submissions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(spec.clone());

    let behavior = self.behavior_for(&spec.step_id);
    let job_id = format!(
      "fake-job-{}",
      self.job_counter.fetch_add(1, Ordering::SeqCst) + 1
    );
    debug!(step_id = %spec.step_id, job_id = %job_id, ?behavior, "fake job submitted");

    let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(running, Ordering::SeqCst);
    let _guard = InFlightGuard(&self.in_flight);

    self.run(&spec, behavior, job_id, cancel).await
  }
}

/// Releases an in-flight slot when the submission ends or is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}
