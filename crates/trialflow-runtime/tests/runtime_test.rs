//! Integration tests for Runtime::invoke against the in-memory job service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trialflow_config::clinical::{TemplateOptions, adam_tfl_template};
use trialflow_config::{
  ArtifactKind, ArtifactRef, ParameterSpec, ProjectDefaults, RootInput, StepSpec, WorkflowBuilder,
  WorkflowDef,
};
use trialflow_job::{
  FakeBehavior, FakeJobService, JobError, JobInputValue, JobOutputs, JobService, JobSpec,
};
use trialflow_resolver::{Resolver, StandardResolver};
use trialflow_runtime::{
  ChannelNotifier, ExecutionEvent, FailurePolicy, Runtime, RuntimeConfig, RuntimeError,
};
use trialflow_workflow::Workflow;

const ROOT: &str = "/data/SDTMBLIND/snapshot-1";

fn root() -> RootInput {
  ROOT.parse().unwrap()
}

fn resolve(def: WorkflowDef) -> Workflow {
  let defaults = ProjectDefaults {
    environment: Some("SAS Analytics Pro".to_string()),
    ..ProjectDefaults::default()
  };
  StandardResolver::new(defaults).resolve(def).unwrap()
}

fn sequential() -> RuntimeConfig {
  RuntimeConfig {
    max_concurrent_submissions: 1,
    ..RuntimeConfig::default()
  }
}

fn adam_step(step_id: &str, upstream: &[&ArtifactRef]) -> StepSpec {
  let mut spec = StepSpec::new(
    step_id,
    format!("prod/adam_flows/{}.sas", step_id.to_uppercase()),
  )
  .input_parameter("sdtm_data_path")
  .output(step_id, ArtifactKind::dataset("sas7bdat"));
  for reference in upstream {
    spec = spec.input_artifact(&reference.step, reference);
  }
  spec
}

/// adsl -> adae -> t_ae, adsl -> adcm, and an unrelated listing step.
fn branching_workflow() -> Workflow {
  let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
  let adsl = builder.step(adam_step("adsl", &[])).unwrap();
  let adsl = adsl.get("adsl").unwrap().clone();
  let adae = builder.step(adam_step("adae", &[&adsl])).unwrap();
  let adae = adae.get("adae").unwrap().clone();
  builder.step(adam_step("adcm", &[&adsl])).unwrap();
  builder.step(adam_step("t_ae", &[&adae])).unwrap();
  builder.step(adam_step("listing", &[])).unwrap();
  resolve(builder.build())
}

/// Delegates to the fake service, except that submitting `step` panics.
struct PanicsOn {
  step: &'static str,
  inner: FakeJobService,
}

#[async_trait]
impl JobService for PanicsOn {
  async fn submit(
    &self,
    spec: JobSpec,
    cancel: CancellationToken,
  ) -> Result<JobOutputs, JobError> {
    if spec.step_id == self.step {
      panic!("job service crashed on {}", spec.step_id);
    }
    self.inner.submit(spec, cancel).await
  }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<(String, Option<String>)> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push((event.name().to_string(), event.step_id().map(String::from)));
  }
  events
}

#[tokio::test]
async fn test_adae_receives_exact_adsl_handle() {
  let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
  let adsl = builder.step(adam_step("adsl", &[])).unwrap();
  let adsl_ref = adsl.get("adsl").unwrap().clone();
  let adae = builder.step(adam_step("adae", &[&adsl_ref])).unwrap();
  builder.output("adae", adae.get("adae").unwrap()).unwrap();
  let workflow = resolve(builder.build());

  let service = Arc::new(FakeJobService::new());
  let runtime = Runtime::new(workflow, service.clone(), sequential());
  let result = runtime.invoke(root(), CancellationToken::new()).await.unwrap();

  let submissions = service.submissions();
  assert_eq!(submissions.len(), 2);
  assert_eq!(submissions[0].step_id, "adsl");
  assert_eq!(
    submissions[0].get_input("sdtm_data_path"),
    Some(&JobInputValue::Literal(json!(ROOT)))
  );

  let adsl_handle = result.step_results["adsl"].get_output("adsl").unwrap();
  assert_eq!(submissions[1].step_id, "adae");
  assert_eq!(
    submissions[1].get_input("adsl"),
    Some(&JobInputValue::Artifact(adsl_handle.clone()))
  );
  assert_eq!(
    submissions[1].get_input("sdtm_data_path"),
    Some(&JobInputValue::Literal(json!(ROOT)))
  );

  assert_eq!(
    &result.outputs["adae"],
    result.step_results["adae"].get_output("adae").unwrap()
  );
}

#[tokio::test]
async fn test_full_template_returns_report_handle_unchanged() {
  let workflow = resolve(adam_tfl_template(&TemplateOptions::full()).unwrap());
  let service = Arc::new(FakeJobService::new());
  let runtime = Runtime::new(workflow, service.clone(), sequential());

  let root: RootInput = "snapshot:SDTMBLIND@1".parse().unwrap();
  let result = runtime.invoke(root, CancellationToken::new()).await.unwrap();

  assert_eq!(
    service.submitted_steps(),
    vec!["adsl", "adae", "adcm", "adlb", "admh", "advs", "t_pop"]
  );
  assert_eq!(result.outputs.len(), 1);

  let t_pop = &result.outputs["t_pop"];
  assert_eq!(t_pop.kind, ArtifactKind::report("pdf"));
  assert_eq!(t_pop, &result.step_results["t_pop"].outputs[0]);

  // Only ADSL feeds the population table.
  let t_pop_spec = service
    .submissions()
    .into_iter()
    .find(|s| s.step_id == "t_pop")
    .unwrap();
  let consumed: Vec<_> = t_pop_spec.artifact_inputs().collect();
  assert_eq!(consumed.len(), 1);
  assert_eq!(consumed[0], result.step_results["adsl"].get_output("adsl").unwrap());
  assert_eq!(t_pop_spec.command, "prod/tfl_flows/t_pop.sas");
}

#[tokio::test]
async fn test_independent_steps_are_each_submitted_once() {
  let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
  for domain in ["adsl", "adae", "adcm", "adlb", "advs"] {
    builder.step(adam_step(domain, &[])).unwrap();
  }
  let workflow = resolve(builder.build());

  let service = Arc::new(FakeJobService::new());
  let runtime = Runtime::new(workflow, service.clone(), RuntimeConfig::default());
  let result = runtime.invoke(root(), CancellationToken::new()).await.unwrap();

  let submissions = service.submissions();
  assert_eq!(submissions.len(), 5);
  assert_eq!(result.step_results.len(), 5);
  for spec in &submissions {
    assert_eq!(spec.inputs.len(), 1);
    assert_eq!(spec.inputs[0].value, JobInputValue::Literal(json!(ROOT)));
    assert_eq!(spec.artifact_inputs().count(), 0);
  }
}

#[tokio::test]
async fn test_fail_fast_stops_submitting() {
  let service = Arc::new(
    FakeJobService::new().with_behavior("adae", FakeBehavior::Fail("ERROR: ADAE.sas".to_string())),
  );
  let runtime = Runtime::new(branching_workflow(), service.clone(), sequential());

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::Execution { ref step_id, .. } if step_id == "adae"));
  assert_eq!(service.submitted_steps(), vec!["adsl", "adae"]);
}

#[tokio::test]
async fn test_fail_fast_awaits_in_flight_siblings() {
  let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
  let adsl = builder.step(adam_step("adsl", &[])).unwrap();
  let adsl = adsl.get("adsl").unwrap().clone();
  for domain in ["adae", "adcm", "adlb"] {
    builder.step(adam_step(domain, &[&adsl])).unwrap();
  }
  let workflow = resolve(builder.build());

  let service = Arc::new(
    FakeJobService::new()
      .with_behavior("adae", FakeBehavior::Fail("ERROR: ADAE.sas".to_string()))
      .with_behavior("adcm", FakeBehavior::Delay(Duration::from_millis(20))),
  );
  let config = RuntimeConfig {
    max_concurrent_submissions: 2,
    ..RuntimeConfig::default()
  };
  let (tx, mut rx) = mpsc::unbounded_channel();
  let runtime = Runtime::new(workflow, service.clone(), config)
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::Execution { ref step_id, .. } if step_id == "adae"));
  assert_eq!(service.submitted_steps(), vec!["adsl", "adae", "adcm"]);
  assert!(service.cancelled_steps().is_empty());
  assert_eq!(service.in_flight(), 0);

  let events = drain(&mut rx);
  assert!(events.contains(&("step_completed".to_string(), Some("adcm".to_string()))));
  assert!(events.contains(&("step_skipped".to_string(), Some("adlb".to_string()))));
  assert_eq!(events.last().unwrap().0, "workflow_failed");
}

#[tokio::test]
async fn test_continue_independent_skips_only_dependents() {
  let service = Arc::new(
    FakeJobService::new().with_behavior("adae", FakeBehavior::Fail("ERROR: ADAE.sas".to_string())),
  );
  let config = RuntimeConfig {
    failure_policy: FailurePolicy::ContinueIndependent,
    ..sequential()
  };
  let (tx, mut rx) = mpsc::unbounded_channel();
  let runtime = Runtime::new(branching_workflow(), service.clone(), config)
    .with_notifier(Arc::new(ChannelNotifier::new(tx)));

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  assert_eq!(service.submitted_steps(), vec!["adsl", "adae", "adcm", "listing"]);
  match err {
    RuntimeError::StepsFailed {
      failures,
      skipped,
      orphaned,
    } => {
      assert_eq!(failures.len(), 1);
      assert_eq!(failures[0].step_id(), Some("adae"));
      assert_eq!(skipped, vec!["t_ae"]);
      let producers: Vec<&str> = orphaned.iter().map(|h| h.step_id.as_str()).collect();
      assert_eq!(producers, ["adsl", "adcm", "listing"]);
    }
    other => panic!("expected StepsFailed, got {other:?}"),
  }

  let events = drain(&mut rx);
  assert!(events.contains(&("step_skipped".to_string(), Some("t_ae".to_string()))));
  assert_eq!(events.last().unwrap().0, "workflow_failed");
}

#[tokio::test]
async fn test_failed_step_blocks_transitive_dependents_when_concurrent() {
  let service = Arc::new(
    FakeJobService::new()
      .with_behavior("adsl", FakeBehavior::Reject("unknown environment".to_string()))
      .with_behavior("listing", FakeBehavior::Delay(Duration::from_millis(20))),
  );
  let config = RuntimeConfig {
    failure_policy: FailurePolicy::ContinueIndependent,
    ..RuntimeConfig::default()
  };
  let runtime = Runtime::new(branching_workflow(), service.clone(), config);

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  let mut submitted = service.submitted_steps();
  submitted.sort();
  assert_eq!(submitted, vec!["adsl", "listing"]);
  match err {
    RuntimeError::StepsFailed { failures, skipped, .. } => {
      assert!(matches!(failures[0], RuntimeError::Submission { .. }));
      assert_eq!(skipped, vec!["adae", "adcm", "t_ae"]);
    }
    other => panic!("expected StepsFailed, got {other:?}"),
  }
}

#[tokio::test]
async fn test_reruns_are_deterministic() {
  let mut runs = Vec::new();
  for _ in 0..2 {
    let workflow = resolve(adam_tfl_template(&TemplateOptions::full()).unwrap());
    let service = Arc::new(FakeJobService::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runtime = Runtime::new(workflow, service.clone(), sequential())
      .with_notifier(Arc::new(ChannelNotifier::new(tx)));

    runtime.invoke(root(), CancellationToken::new()).await.unwrap();
    runs.push((service.submitted_steps(), drain(&mut rx)));
  }

  assert_eq!(runs[0], runs[1]);
  let (_, events) = &runs[0];
  assert_eq!(events.first().unwrap().0, "workflow_started");
  assert_eq!(events.last().unwrap().0, "workflow_completed");
  assert_eq!(events.len(), 2 + 7 * 2);
}

#[tokio::test]
async fn test_rejected_submission() {
  let service = Arc::new(
    FakeJobService::new().with_behavior("adsl", FakeBehavior::Reject("no such snapshot".to_string())),
  );
  let runtime = Runtime::new(branching_workflow(), service.clone(), sequential());

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::Submission { ref step_id, .. } if step_id == "adsl"));
  assert_eq!(service.submitted_steps(), vec!["adsl"]);
}

#[tokio::test]
async fn test_missing_output_is_an_execution_error() {
  let service =
    Arc::new(FakeJobService::new().with_behavior("adsl", FakeBehavior::OmitOutput("adsl".to_string())));
  let runtime = Runtime::new(branching_workflow(), service.clone(), sequential());

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::Execution { ref step_id, .. } if step_id == "adsl"));
  assert_eq!(service.submitted_steps(), vec!["adsl"]);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout() {
  let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
  builder.step(adam_step("adsl", &[]).timeout_ms(50)).unwrap();
  let workflow = resolve(builder.build());

  let service = Arc::new(FakeJobService::new().with_behavior("adsl", FakeBehavior::Hang));
  let runtime = Runtime::new(workflow, service.clone(), sequential());

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();
  assert_eq!(
    err,
    RuntimeError::Timeout {
      step_id: "adsl".to_string(),
      timeout_ms: 50,
    }
  );
  // The job saw its token fire before the step was given up on.
  assert_eq!(service.cancelled_steps(), vec!["adsl"]);
  assert_eq!(service.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_step_timeout() {
  let workflow = branching_workflow();
  let service = Arc::new(FakeJobService::new().with_behavior("adsl", FakeBehavior::Hang));
  let config = RuntimeConfig {
    default_step_timeout: Some(Duration::from_secs(3600)),
    ..sequential()
  };
  let runtime = Runtime::new(workflow, service, config);

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, RuntimeError::Timeout { timeout_ms: 3_600_000, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_workflow_timeout() {
  let mut builder =
    WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path")).with_timeout_ms(100);
  builder.step(adam_step("adsl", &[])).unwrap();
  let workflow = resolve(builder.build());

  let service = Arc::new(FakeJobService::new().with_behavior("adsl", FakeBehavior::Hang));
  let runtime = Runtime::new(workflow, service, sequential());

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();
  assert_eq!(err, RuntimeError::WorkflowTimeout { timeout_ms: 100 });
}

#[tokio::test]
async fn test_cancellation_stops_in_flight_jobs() {
  let service = Arc::new(FakeJobService::new().with_behavior("adae", FakeBehavior::Hang));
  let runtime = Runtime::new(branching_workflow(), service.clone(), sequential());

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.cancel();
  });

  let err = runtime.invoke(root(), cancel).await.unwrap_err();
  assert_eq!(err, RuntimeError::Cancelled);
  assert_eq!(service.submitted_steps(), vec!["adsl", "adae"]);
}

#[tokio::test]
async fn test_crashed_step_task_cancels_siblings() {
  let service = Arc::new(PanicsOn {
    step: "adae",
    inner: FakeJobService::new().with_behavior("listing", FakeBehavior::Hang),
  });
  let runtime = Runtime::new(branching_workflow(), service.clone(), RuntimeConfig::default());

  let err = runtime
    .invoke(root(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RuntimeError::TaskJoin { .. }));
  assert_eq!(service.inner.cancelled_steps(), vec!["listing"]);
  assert_eq!(service.inner.in_flight(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start_submits_nothing() {
  let service = Arc::new(FakeJobService::new());
  let runtime = Runtime::new(branching_workflow(), service.clone(), sequential());

  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = runtime.invoke(root(), cancel).await.unwrap_err();
  assert_eq!(err, RuntimeError::Cancelled);
  assert!(service.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
  let mut builder = WorkflowBuilder::new("ADaM", ParameterSpec::new("sdtm_data_path"));
  let service = FakeJobService::new();
  for domain in ["adsl", "adae", "adcm", "adlb", "admh", "advs"] {
    builder.step(adam_step(domain, &[])).unwrap();
    service.set_behavior(domain, FakeBehavior::Delay(Duration::from_millis(20)));
  }
  let workflow = resolve(builder.build());
  let service = Arc::new(service);

  let config = RuntimeConfig {
    max_concurrent_submissions: 2,
    ..RuntimeConfig::default()
  };
  let runtime = Runtime::new(workflow, service.clone(), config);
  runtime.invoke(root(), CancellationToken::new()).await.unwrap();

  assert_eq!(service.submissions().len(), 6);
  assert_eq!(service.max_in_flight(), 2);
  // Submission order still follows declaration order among ready steps.
  assert_eq!(
    service.submitted_steps(),
    vec!["adsl", "adae", "adcm", "adlb", "admh", "advs"]
  );
}

#[tokio::test]
async fn test_invoke_step_with_supplied_handles() {
  let workflow = branching_workflow();
  let service = Arc::new(FakeJobService::new());
  let runtime = Runtime::new(workflow, service.clone(), sequential());

  let err = runtime
    .invoke_step("adae", root(), Vec::new(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, RuntimeError::UnresolvedInput { ref reference, .. } if reference == "adsl.adsl"));
  assert!(service.submissions().is_empty());

  let adsl = trialflow_job::ArtifactHandle {
    step_id: "adsl".to_string(),
    output: "adsl".to_string(),
    kind: ArtifactKind::dataset("sas7bdat"),
    locator: "/mnt/artifacts/adsl.sas7bdat".to_string(),
  };
  let result = runtime
    .invoke_step("adae", root(), vec![adsl.clone()], CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.step_id, "adae");
  assert_eq!(service.submitted_steps(), vec!["adae"]);
  assert_eq!(
    service.submissions()[0].get_input("adsl"),
    Some(&JobInputValue::Artifact(adsl))
  );

  let err = runtime
    .invoke_step("t_pop", root(), Vec::new(), CancellationToken::new())
    .await
    .unwrap_err();
  assert_eq!(err, RuntimeError::StepNotFound("t_pop".to_string()));
}
