//! Job service backed by the execution platform's HTTP API.
//!
//! A job is created with `POST {base}/jobs` and then polled with
//! `GET {base}/jobs/{job_id}` until it reaches a terminal status. Cancelling the
//! caller's token sends a best-effort `POST {base}/jobs/{job_id}/stop`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::JobError;
use crate::service::JobService;
use crate::spec::{ArtifactHandle, JobOutputs, JobSpec};

fn default_poll_interval_ms() -> u64 {
  5_000
}

fn default_request_timeout_ms() -> u64 {
  30_000
}

/// Connection settings for [`HttpJobService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpServiceConfig {
  pub base_url: String,
  /// Bearer token. Never written back to disk.
  #[serde(default, skip_serializing)]
  pub api_key: Option<String>,
  /// Platform project the jobs are created in.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub project: Option<String>,
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
}

impl HttpServiceConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      api_key: None,
      project: None,
      poll_interval_ms: default_poll_interval_ms(),
      request_timeout_ms: default_request_timeout_ms(),
    }
  }
}

/// Lifecycle status reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Running,
  Succeeded,
  Failed,
  Stopped,
  Error,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Queued | Self::Running)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Stopped => "stopped",
      Self::Error => "error",
    }
  }
}

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
  #[serde(flatten)]
  spec: &'a JobSpec,
  #[serde(skip_serializing_if = "Option::is_none")]
  project: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
  job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ProducedOutput {
  name: String,
  locator: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JobStatusResponse {
  status: JobStatus,
  #[serde(default)]
  message: Option<String>,
  #[serde(default)]
  outputs: Vec<ProducedOutput>,
}

/// [`JobService`] implementation over reqwest.
#[derive(Debug, Clone)]
pub struct HttpJobService {
  base_url: Url,
  http: Client,
  project: Option<String>,
  poll_interval: Duration,
}

impl HttpJobService {
  pub fn new(config: HttpServiceConfig) -> Result<Self, JobError> {
    let base_url = parse_base_url(&config.base_url)?;

    let mut default_headers = header::HeaderMap::new();
    default_headers.insert(
      header::ACCEPT,
      header::HeaderValue::from_static("application/json"),
    );
    if let Some(api_key) = &config.api_key {
      let mut value = header::HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(
        |_| JobError::InvalidConfig {
          message: "api key contains characters not allowed in a header".to_string(),
        },
      )?;
      value.set_sensitive(true);
      default_headers.insert(header::AUTHORIZATION, value);
    }

    let http = Client::builder()
      .default_headers(default_headers)
      .timeout(Duration::from_millis(config.request_timeout_ms))
      .build()
      .map_err(|e| JobError::InvalidConfig {
        message: format!("failed to build http client: {}", e),
      })?;

    Ok(Self {
      base_url,
      http,
      project: config.project,
      poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url(&self, path: &str) -> Result<Url, JobError> {
    self.base_url.join(path).map_err(|e| JobError::InvalidConfig {
      message: format!("invalid request path '{}': {}", path, e),
    })
  }

  async fn create(&self, spec: &JobSpec) -> Result<String, JobError> {
    let body = CreateJobRequest {
      spec,
      project: self.project.as_deref(),
    };
    let response = self
      .http
      .post(self.url("jobs")?)
      .json(&body)
      .send()
      .await
      .map_err(transport)?;

    let status = response.status();
    if status.is_client_error() {
      let text = response.text().await.unwrap_or_default();
      return Err(JobError::rejected(rejection_message(status, &text)));
    }
    if !status.is_success() {
      return Err(JobError::Transport {
        message: format!("job creation returned {}", status),
      });
    }

    let created: CreateJobResponse = response.json().await.map_err(|e| JobError::InvalidResponse {
      message: format!("job creation response: {}", e),
    })?;
    Ok(created.job_id)
  }

  async fn status(&self, job_id: &str) -> Result<JobStatusResponse, JobError> {
    let response = self
      .http
      .get(self.url(&format!("jobs/{}", job_id))?)
      .send()
      .await
      .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
      return Err(JobError::Transport {
        message: format!("status of job '{}' returned {}", job_id, status),
      });
    }

    response.json().await.map_err(|e| JobError::InvalidResponse {
      message: format!("status of job '{}': {}", job_id, e),
    })
  }

  async fn stop(&self, job_id: &str) {
    let result = match self.url(&format!("jobs/{}/stop", job_id)) {
      Ok(url) => self.http.post(url).send().await.map_err(transport),
      Err(e) => Err(e),
    };
    if let Err(e) = result {
      warn!(job_id = %job_id, error = %e, "failed to stop cancelled job");
    }
  }
}

#[async_trait]
impl JobService for HttpJobService {
  #[instrument(
    name = "job_submit",
    skip(self, spec, cancel),
    fields(step_id = %spec.step_id, execution_id = %spec.execution_id)
  )]
  async fn submit(
    &self,
    spec: JobSpec,
    cancel: CancellationToken,
  ) -> Result<JobOutputs, JobError> {
    let job_id = tokio::select! {
      created = self.create(&spec) => created?,
      _ = cancel.cancelled() => return Err(JobError::Cancelled),
    };
    debug!(job_id = %job_id, "job created");

    loop {
      let current = tokio::select! {
        current = self.status(&job_id) => match current {
          Ok(current) => current,
          Err(e) => {
            self.stop(&job_id).await;
            return Err(e);
          }
        },
        _ = cancel.cancelled() => {
          self.stop(&job_id).await;
          return Err(JobError::Cancelled);
        }
      };

      if current.status.is_terminal() {
        debug!(job_id = %job_id, status = current.status.as_str(), "job finished");
        return outputs_from_status(&spec, job_id, current);
      }

      tokio::select! {
        _ = tokio::time::sleep(self.poll_interval) => {}
        _ = cancel.cancelled() => {
          self.stop(&job_id).await;
          return Err(JobError::Cancelled);
        }
      }
    }
  }
}

fn transport(e: reqwest::Error) -> JobError {
  JobError::Transport {
    message: e.to_string(),
  }
}

/// Parse the base URL, forcing a trailing slash so relative joins keep its path.
fn parse_base_url(raw: &str) -> Result<Url, JobError> {
  let mut url = Url::parse(raw).map_err(|e| JobError::InvalidConfig {
    message: format!("invalid base url '{}': {}", raw, e),
  })?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(JobError::InvalidConfig {
      message: format!("base url must use http or https, got '{}'", url.scheme()),
    });
  }
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

fn rejection_message(status: StatusCode, body: &str) -> String {
  let body = body.trim();
  if body.is_empty() {
    format!("service answered {}", status)
  } else {
    format!("service answered {}: {}", status, body)
  }
}

/// Turn a terminal status into the job's outputs.
///
/// Produced outputs are matched to the job's declared outputs by name; anything
/// the job did not declare is dropped.
fn outputs_from_status(
  spec: &JobSpec,
  job_id: String,
  response: JobStatusResponse,
) -> Result<JobOutputs, JobError> {
  if response.status != JobStatus::Succeeded {
    let message = response
      .message
      .unwrap_or_else(|| "no message".to_string());
    return Err(JobError::failed(job_id, response.status.as_str(), message));
  }

  let mut artifacts = Vec::with_capacity(spec.outputs.len());
  for produced in response.outputs {
    let Some(declared) = spec.outputs.iter().find(|o| o.name == produced.name) else {
      debug!(job_id = %job_id, output = %produced.name, "ignoring undeclared output");
      continue;
    };
    artifacts.push(ArtifactHandle {
      step_id: spec.step_id.clone(),
      output: declared.name.clone(),
      kind: declared.kind.clone(),
      locator: produced.locator,
    });
  }

  Ok(JobOutputs { job_id, artifacts })
}
