//! Workflow runtime.
//!
//! The [`Runtime`] struct is the main entry point for executing workflows.
//! It owns a locked workflow and the job service steps are submitted to, and
//! provides `invoke(root_input, cancel)` to execute the full workflow graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use trialflow_config::{ArtifactRef, RootInput};
use trialflow_job::{ArtifactHandle, JobService, JobSpec};
use trialflow_workflow::{Graph, Step, Workflow};

use crate::error::RuntimeError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::input::{check_outputs, job_spec, resolve_inputs};
use crate::result::{InvokeResult, StepResult};

/// Output of a spawned submission task.
type StepOutcome = (String, Result<StepResult, RuntimeError>);

/// What happens to the rest of a run when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Stop submitting, wait for the steps already submitted, return the first failure.
  #[default]
  FailFast,
  /// Skip the failed step's dependents and keep running everything else.
  ContinueIndependent,
}

/// Configuration for the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
  /// Upper bound on jobs in flight at once. `1` submits strictly one at a time.
  pub max_concurrent_submissions: usize,
  /// Timeout for steps that do not set their own.
  pub default_step_timeout: Option<Duration>,
  pub failure_policy: FailurePolicy,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      max_concurrent_submissions: 4,
      default_step_timeout: None,
      failure_policy: FailurePolicy::FailFast,
    }
  }
}

/// The serializable form of [`RuntimeConfig`], as stored in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_concurrent_submissions: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_step_timeout_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_policy: Option<FailurePolicy>,
}

impl From<RuntimeSettings> for RuntimeConfig {
  fn from(settings: RuntimeSettings) -> Self {
    let defaults = RuntimeConfig::default();
    Self {
      max_concurrent_submissions: settings
        .max_concurrent_submissions
        .unwrap_or(defaults.max_concurrent_submissions),
      default_step_timeout: settings
        .default_step_timeout_ms
        .map(Duration::from_millis)
        .or(defaults.default_step_timeout),
      failure_policy: settings.failure_policy.unwrap_or(defaults.failure_policy),
    }
  }
}

/// Why the scheduler woke up.
enum Wake {
  Joined(Option<Result<StepOutcome, JoinError>>),
  Cancelled,
  Deadline,
}

/// Mutable state of one run, owned by the scheduling loop.
struct RunState<'a> {
  /// Steps not yet submitted, in topological order.
  pending: Vec<&'a Step>,
  completed: HashSet<String>,
  /// Written once per output, when the producing step completes.
  produced: HashMap<ArtifactRef, ArtifactHandle>,
  step_results: HashMap<String, StepResult>,
  /// Handles in the order they were produced.
  handles: Vec<ArtifactHandle>,
  first_error: Option<RuntimeError>,
  failures: Vec<RuntimeError>,
  skipped: Vec<String>,
  /// Set once no further steps may be submitted; later completions are orphaned.
  halted: bool,
}

impl<'a> RunState<'a> {
  fn new(pending: Vec<&'a Step>) -> Self {
    Self {
      pending,
      completed: HashSet::new(),
      produced: HashMap::new(),
      step_results: HashMap::new(),
      handles: Vec::new(),
      first_error: None,
      failures: Vec::new(),
      skipped: Vec::new(),
      halted: false,
    }
  }

  fn is_ready(&self, graph: &Graph, step: &Step) -> bool {
    graph
      .upstream(&step.step_id)
      .iter()
      .all(|up| self.completed.contains(up))
  }
}

/// The workflow runtime.
///
/// Handles graph traversal, scheduling, and artifact threading, and hands each
/// step to the [`JobService`] it was built with.
pub struct Runtime {
  workflow: Workflow,
  service: Arc<dyn JobService>,
  config: RuntimeConfig,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl Runtime {
  /// Create a new runtime for the given workflow.
  pub fn new(workflow: Workflow, service: Arc<dyn JobService>, config: RuntimeConfig) -> Self {
    Self {
      workflow,
      service,
      config,
      notifier: Arc::new(NoopNotifier),
    }
  }

  /// Deliver execution events to `notifier` as well as to the log.
  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Get a reference to the workflow.
  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  /// Execute the workflow with the given root input.
  #[instrument(
    name = "runtime_invoke",
    skip(self, root_input, cancel),
    fields(
      workflow_id = %self.workflow.workflow_id,
    )
  )]
  pub async fn invoke(
    &self,
    root_input: RootInput,
    cancel: CancellationToken,
  ) -> Result<InvokeResult, RuntimeError> {
    let execution_id = uuid::Uuid::new_v4().to_string();

    info!(
      execution_id = %execution_id,
      workflow_id = %self.workflow.workflow_id,
      root_input = %root_input,
      "workflow_started"
    );
    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.clone(),
      workflow_id: self.workflow.workflow_id.clone(),
    });

    let result = self
      .run_execution_loop(&execution_id, &root_input, &cancel)
      .await;

    match &result {
      Ok(invoke_result) => {
        info!(
          execution_id = %execution_id,
          steps = invoke_result.step_results.len(),
          "workflow_completed"
        );
        self.notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id: execution_id.clone(),
        });
      }
      Err(e) => {
        error!(execution_id = %execution_id, error = %e, "workflow_failed");
        self.notifier.notify(ExecutionEvent::WorkflowFailed {
          execution_id: execution_id.clone(),
          error: e.to_string(),
        });
      }
    }

    result
  }

  /// Execute a single step in isolation.
  ///
  /// This is for debugging - run one step without walking the graph. Artifact
  /// inputs are resolved against `upstream`, so every handle the step reads must
  /// be supplied by the caller.
  #[instrument(
    name = "runtime_invoke_step",
    skip(self, root_input, upstream, cancel),
    fields(
      workflow_id = %self.workflow.workflow_id,
      step_id = %step_id,
    )
  )]
  pub async fn invoke_step(
    &self,
    step_id: &str,
    root_input: RootInput,
    upstream: Vec<ArtifactHandle>,
    cancel: CancellationToken,
  ) -> Result<StepResult, RuntimeError> {
    let step = self
      .workflow
      .get_step(step_id)
      .ok_or_else(|| RuntimeError::StepNotFound(step_id.to_string()))?;

    let execution_id = uuid::Uuid::new_v4().to_string();
    info!(
      execution_id = %execution_id,
      step_id = %step_id,
      upstream = upstream.len(),
      "invoke_step_started"
    );

    let produced: HashMap<ArtifactRef, ArtifactHandle> = upstream
      .into_iter()
      .map(|h| (ArtifactRef::new(h.step_id.clone(), h.output.clone()), h))
      .collect();
    let inputs = resolve_inputs(step, &root_input, &produced)?;
    let spec = job_spec(step, &execution_id, inputs);

    self.log_submitted(&execution_id, step);
    let result = submit_step(
      self.service.clone(),
      step.clone(),
      spec,
      self.step_timeout(step),
      cancel.child_token(),
    )
    .await;

    match &result {
      Ok(step_result) => self.log_completed(&execution_id, step_result),
      Err(e) => self.log_failed(&execution_id, step_id, e),
    }

    result
  }

  /// Run the main execution loop.
  async fn run_execution_loop(
    &self,
    execution_id: &str,
    root: &RootInput,
    cancel: &CancellationToken,
  ) -> Result<InvokeResult, RuntimeError> {
    self.workflow.validate()?;
    let graph = self.workflow.graph();
    let order = self.workflow.submission_order()?;

    let deadline = self
      .workflow
      .timeout_ms
      .map(|ms| Instant::now() + Duration::from_millis(ms));
    let run_cancel = cancel.child_token();

    let mut state = RunState::new(order);
    let mut tasks: JoinSet<StepOutcome> = JoinSet::new();

    loop {
      if cancel.is_cancelled() {
        warn!(execution_id = %execution_id, "workflow cancelled");
        self
          .abort(&mut state, &mut tasks, &run_cancel, execution_id)
          .await;
        return Err(RuntimeError::Cancelled);
      }

      if !state.halted {
        self.submit_ready(&mut state, &mut tasks, &graph, execution_id, root, &run_cancel);
      }
      if tasks.is_empty() {
        break;
      }

      let wake = tokio::select! {
        joined = tasks.join_next() => Wake::Joined(joined),
        _ = cancel.cancelled() => Wake::Cancelled,
        _ = wait_until(deadline) => Wake::Deadline,
      };

      let joined = match wake {
        Wake::Joined(Some(joined)) => joined,
        Wake::Joined(None) => break,
        Wake::Cancelled => continue,
        Wake::Deadline => {
          let timeout_ms = self.workflow.timeout_ms.unwrap_or_default();
          warn!(execution_id = %execution_id, timeout_ms, "workflow timed out");
          self
            .abort(&mut state, &mut tasks, &run_cancel, execution_id)
            .await;
          return Err(RuntimeError::WorkflowTimeout { timeout_ms });
        }
      };

      let (step_id, result) = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
          error!(execution_id = %execution_id, error = %e, "step task failed");
          self
            .abort(&mut state, &mut tasks, &run_cancel, execution_id)
            .await;
          return Err(RuntimeError::TaskJoin {
            message: e.to_string(),
          });
        }
      };
      match result {
        Ok(step_result) => self.record_completion(&mut state, execution_id, step_result),
        Err(e) => self.record_failure(&mut state, &graph, execution_id, &step_id, e),
      }
    }

    self.finish(state, execution_id)
  }

  /// Submit pending steps whose upstream steps have all completed, in
  /// topological order, until the concurrency limit is reached.
  fn submit_ready<'a>(
    &self,
    state: &mut RunState<'a>,
    tasks: &mut JoinSet<StepOutcome>,
    graph: &Graph,
    execution_id: &str,
    root: &RootInput,
    run_cancel: &CancellationToken,
  ) {
    let limit = self.config.max_concurrent_submissions.max(1);
    let mut i = 0;

    while i < state.pending.len() && tasks.len() < limit {
      let step = state.pending[i];
      if !state.is_ready(graph, step) {
        i += 1;
        continue;
      }
      state.pending.remove(i);

      let inputs = match resolve_inputs(step, root, &state.produced) {
        Ok(inputs) => inputs,
        Err(e) => {
          self.record_failure(state, graph, execution_id, &step.step_id, e);
          if state.halted {
            return;
          }
          continue;
        }
      };
      let spec = job_spec(step, execution_id, inputs);

      self.log_submitted(execution_id, step);
      let service = self.service.clone();
      let step = step.clone();
      let timeout = self.step_timeout(&step);
      let token = run_cancel.child_token();

      tasks.spawn(async move {
        let step_id = step.step_id.clone();
        let result = submit_step(service, step, spec, timeout, token).await;
        (step_id, result)
      });
    }
  }

  fn record_completion(&self, state: &mut RunState<'_>, execution_id: &str, result: StepResult) {
    self.log_completed(execution_id, &result);

    if state.halted {
      for handle in &result.outputs {
        log_orphaned(execution_id, handle);
      }
    } else {
      for handle in &result.outputs {
        state.produced.insert(
          ArtifactRef::new(handle.step_id.clone(), handle.output.clone()),
          handle.clone(),
        );
      }
      state.handles.extend(result.outputs.iter().cloned());
      state.completed.insert(result.step_id.clone());
    }

    state.step_results.insert(result.step_id.clone(), result);
  }

  fn record_failure(
    &self,
    state: &mut RunState<'_>,
    graph: &Graph,
    execution_id: &str,
    step_id: &str,
    error: RuntimeError,
  ) {
    self.log_failed(execution_id, step_id, &error);

    match self.config.failure_policy {
      FailurePolicy::FailFast => {
        if state.first_error.is_none() {
          state.first_error = Some(error);
        }
        if !state.halted {
          state.halted = true;
          for step in std::mem::take(&mut state.pending) {
            self.log_skipped(execution_id, &step.step_id, step_id);
            state.skipped.push(step.step_id.clone());
          }
        }
      }
      FailurePolicy::ContinueIndependent => {
        state.failures.push(error);
        let dependents = graph.dependents(step_id);
        let (skipped, kept): (Vec<&Step>, Vec<&Step>) = std::mem::take(&mut state.pending)
          .into_iter()
          .partition(|s| dependents.contains(&s.step_id));
        state.pending = kept;
        for step in skipped {
          self.log_skipped(execution_id, &step.step_id, step_id);
          state.skipped.push(step.step_id.clone());
        }
      }
    }
  }

  /// Cancel every in-flight submission and wait for it to wind down.
  async fn abort(
    &self,
    state: &mut RunState<'_>,
    tasks: &mut JoinSet<StepOutcome>,
    run_cancel: &CancellationToken,
    execution_id: &str,
  ) {
    state.halted = true;
    run_cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
      if let Ok((_, Ok(result))) = joined {
        self.record_completion(state, execution_id, result);
      }
    }
  }

  fn finish(
    &self,
    mut state: RunState<'_>,
    execution_id: &str,
  ) -> Result<InvokeResult, RuntimeError> {
    if let Some(error) = state.first_error.take() {
      return Err(error);
    }

    if !state.failures.is_empty() {
      for handle in &state.handles {
        log_orphaned(execution_id, handle);
      }
      return Err(RuntimeError::StepsFailed {
        failures: state.failures,
        skipped: state.skipped,
        orphaned: state.handles,
      });
    }

    let mut outputs = HashMap::with_capacity(self.workflow.outputs.len());
    for output in &self.workflow.outputs {
      let handle = state
        .produced
        .get(&output.from)
        .cloned()
        .ok_or_else(|| RuntimeError::Execution {
          step_id: output.from.step.clone(),
          message: format!("workflow output '{}' was never produced", output.name),
        })?;
      outputs.insert(output.name.clone(), handle);
    }

    Ok(InvokeResult {
      execution_id: execution_id.to_string(),
      outputs,
      step_results: state.step_results,
    })
  }

  fn step_timeout(&self, step: &Step) -> Option<Duration> {
    step
      .timeout_ms
      .map(Duration::from_millis)
      .or(self.config.default_step_timeout)
  }

  fn log_submitted(&self, execution_id: &str, step: &Step) {
    info!(
      execution_id = %execution_id,
      step_id = %step.step_id,
      command = %step.command,
      environment = %step.environment,
      "step_submitted"
    );
    self.notifier.notify(ExecutionEvent::StepSubmitted {
      execution_id: execution_id.to_string(),
      step_id: step.step_id.clone(),
    });
  }

  fn log_completed(&self, execution_id: &str, result: &StepResult) {
    info!(
      execution_id = %execution_id,
      step_id = %result.step_id,
      job_id = %result.job_id,
      outputs = result.outputs.len(),
      "step_completed"
    );
    self.notifier.notify(ExecutionEvent::StepCompleted {
      execution_id: execution_id.to_string(),
      step_id: result.step_id.clone(),
      job_id: result.job_id.clone(),
      outputs: result.outputs.clone(),
    });
  }

  fn log_failed(&self, execution_id: &str, step_id: &str, error: &RuntimeError) {
    error!(
      execution_id = %execution_id,
      step_id = %step_id,
      error = %error,
      "step_failed"
    );
    self.notifier.notify(ExecutionEvent::StepFailed {
      execution_id: execution_id.to_string(),
      step_id: step_id.to_string(),
      error: error.to_string(),
    });
  }

  fn log_skipped(&self, execution_id: &str, step_id: &str, failed_step: &str) {
    warn!(
      execution_id = %execution_id,
      step_id = %step_id,
      failed_step = %failed_step,
      "step_skipped"
    );
    self.notifier.notify(ExecutionEvent::StepSkipped {
      execution_id: execution_id.to_string(),
      step_id: step_id.to_string(),
      failed_step: failed_step.to_string(),
    });
  }
}

/// Submit one step and wait for its outputs.
async fn submit_step(
  service: Arc<dyn JobService>,
  step: Step,
  spec: JobSpec,
  timeout: Option<Duration>,
  cancel: CancellationToken,
) -> Result<StepResult, RuntimeError> {
  let inputs = spec.inputs.clone();
  let mut submission = service.submit(spec, cancel.clone());

  let outputs = match timeout {
    Some(limit) => tokio::select! {
      result = &mut submission => result,
      _ = tokio::time::sleep(limit) => {
        // Let the submission observe the cancellation and stop its job.
        cancel.cancel();
        if let Ok(late) = submission.await {
          debug!(
            step_id = %step.step_id,
            job_id = %late.job_id,
            "job finished after timeout"
          );
        }
        return Err(RuntimeError::Timeout {
          step_id: step.step_id,
          timeout_ms: limit.as_millis() as u64,
        });
      }
    },
    None => submission.await,
  }
  .map_err(|e| RuntimeError::from_job(step.step_id.clone(), e))?;

  check_outputs(&step, &outputs)?;

  Ok(StepResult {
    step_id: step.step_id,
    job_id: outputs.job_id,
    inputs,
    outputs: outputs.artifacts,
  })
}

async fn wait_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}

fn log_orphaned(execution_id: &str, handle: &ArtifactHandle) {
  warn!(
    execution_id = %execution_id,
    step_id = %handle.step_id,
    output = %handle.output,
    locator = %handle.locator,
    "orphaned_output"
  );
}
