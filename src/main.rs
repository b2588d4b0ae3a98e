mod config;
mod logging;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trialflow_config::clinical::{SUBJECT_LEVEL_DOMAIN, TemplateOptions, adam_tfl_template};
use trialflow_config::{RootInput, WorkflowDef};
use trialflow_job::{ArtifactHandle, FakeJobService, HttpJobService, JobService};
use trialflow_resolver::{Resolver, StandardResolver};
use trialflow_runtime::{FailurePolicy, Runtime, RuntimeConfig};
use trialflow_workflow::Workflow;

use crate::config::{CONFIG_FILE, Config};

/// Trialflow - clinical trial data pipelines as workflow graphs
#[derive(Parser)]
#[command(name = "trialflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.trialflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Write logs as JSON lines
  #[arg(long, global = true)]
  log_json: bool,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Print the order steps would be submitted in
  Plan {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run an entire workflow
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Root SDTM input: a path, or snapshot:<id>@<version>
    #[arg(long)]
    root_input: RootInput,

    /// Submit to the in-memory job service instead of the platform
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of jobs in flight at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Keep running steps that do not depend on a failed step
    #[arg(long)]
    continue_independent: bool,
  },

  /// Run a single step from a workflow
  RunStep {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// The step ID to execute
    #[arg(long)]
    step: String,

    /// Root SDTM input: a path, or snapshot:<id>@<version>
    #[arg(long)]
    root_input: RootInput,

    /// Upstream handle as step.output=locator (repeatable)
    #[arg(long = "artifact")]
    artifacts: Vec<String>,

    /// Submit to the in-memory job service instead of the platform
    #[arg(long)]
    dry_run: bool,
  },

  /// Print the built-in SDTM -> ADaM -> TFL workflow as JSON
  Template {
    /// Only derive ADSL, from a path input
    #[arg(long, conflicts_with = "domains")]
    minimal: bool,

    /// Domains derived after ADSL (default: ADAE,ADCM,ADLB,ADMH,ADVS)
    #[arg(long, value_delimiter = ',')]
    domains: Option<Vec<String>>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  logging::init_logging(cli.log_json, cli.verbose)?;

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".trialflow"),
  };

  match cli.command {
    Some(Commands::Plan { workflow_file }) => {
      plan(&workflow_file, &data_dir)?;
    }
    Some(Commands::Run {
      workflow_file,
      root_input,
      dry_run,
      max_concurrent,
      continue_independent,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(
        workflow_file,
        root_input,
        RunOptions {
          dry_run,
          max_concurrent,
          continue_independent,
        },
        data_dir,
      ))?;
    }
    Some(Commands::RunStep {
      workflow_file,
      step,
      root_input,
      artifacts,
      dry_run,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_step(
        workflow_file,
        step,
        root_input,
        artifacts,
        dry_run,
        data_dir,
      ))?;
    }
    Some(Commands::Template { minimal, domains }) => {
      let def = template(minimal, domains)?;
      println!("{}", serde_json::to_string_pretty(&def)?);
    }
    None => {
      println!("trialflow - use --help to see available commands");
    }
  }

  Ok(())
}

struct RunOptions {
  dry_run: bool,
  max_concurrent: Option<usize>,
  continue_independent: bool,
}

fn plan(workflow_file: &Path, data_dir: &Path) -> Result<()> {
  let config = Config::load(&data_dir.join(CONFIG_FILE))?;
  let workflow = load_workflow(workflow_file, &config)?;
  let graph = workflow.graph();

  for (i, step) in workflow.submission_order()?.iter().enumerate() {
    let upstream = graph.upstream(&step.step_id);
    if upstream.is_empty() {
      println!("{:>2}. {} - {}", i + 1, step.step_id, step.title);
    } else {
      println!(
        "{:>2}. {} - {} (after {})",
        i + 1,
        step.step_id,
        step.title,
        upstream.join(", ")
      );
    }
  }

  Ok(())
}

async fn run_workflow(
  workflow_file: PathBuf,
  root_input: RootInput,
  options: RunOptions,
  data_dir: PathBuf,
) -> Result<()> {
  let config = Config::load_with_env(&data_dir.join(CONFIG_FILE))?;
  let workflow = load_workflow(&workflow_file, &config)?;
  eprintln!("Resolved workflow with {} steps", workflow.steps.len());

  let mut runtime_config = RuntimeConfig::from(config.runtime.clone());
  if let Some(max) = options.max_concurrent {
    runtime_config.max_concurrent_submissions = max;
  }
  if options.continue_independent {
    runtime_config.failure_policy = FailurePolicy::ContinueIndependent;
  }

  let service = job_service(&config, options.dry_run)?;
  let runtime = Runtime::new(workflow, service, runtime_config);

  let result = runtime
    .invoke(root_input, cancel_on_ctrl_c())
    .await
    .context("workflow execution failed")?;

  eprintln!("Execution completed: {}", result.execution_id);
  eprintln!("Steps executed: {}", result.step_results.len());

  let outputs: BTreeMap<_, _> = result.outputs.into_iter().collect();
  println!("{}", serde_json::to_string_pretty(&outputs)?);

  Ok(())
}

async fn run_step(
  workflow_file: PathBuf,
  step_id: String,
  root_input: RootInput,
  artifacts: Vec<String>,
  dry_run: bool,
  data_dir: PathBuf,
) -> Result<()> {
  let config = Config::load_with_env(&data_dir.join(CONFIG_FILE))?;
  let workflow = load_workflow(&workflow_file, &config)?;

  let upstream = artifacts
    .iter()
    .map(|raw| parse_artifact(&workflow, raw))
    .collect::<Result<Vec<_>>>()?;

  eprintln!("Running step: {}", step_id);

  let service = job_service(&config, dry_run)?;
  let runtime = Runtime::new(workflow, service, RuntimeConfig::from(config.runtime.clone()));

  let result = runtime
    .invoke_step(&step_id, root_input, upstream, cancel_on_ctrl_c())
    .await
    .context("step execution failed")?;

  eprintln!("Step execution completed: job {}", result.job_id);
  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}

fn load_workflow(workflow_file: &Path, config: &Config) -> Result<Workflow> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let def: WorkflowDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;
  info!(workflow_id = %def.workflow_id, name = %def.name, "workflow loaded");

  StandardResolver::new(config.defaults.clone())
    .resolve(def)
    .context("failed to resolve workflow")
}

fn job_service(config: &Config, dry_run: bool) -> Result<Arc<dyn JobService>> {
  if dry_run {
    info!("dry run: jobs are submitted to the in-memory service");
    return Ok(Arc::new(FakeJobService::new()));
  }

  let service =
    HttpJobService::new(config.service_config()?).context("failed to create job service client")?;
  info!(base_url = %service.base_url(), "submitting to execution service");
  Ok(Arc::new(service))
}

/// A token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling");
      trigger.cancel();
    }
  });
  cancel
}

/// Parse a `step.output=locator` argument into a handle for a declared output.
fn parse_artifact(workflow: &Workflow, raw: &str) -> Result<ArtifactHandle> {
  let (reference, locator) = raw
    .split_once('=')
    .with_context(|| format!("invalid artifact '{}': expected step.output=locator", raw))?;
  let (step_id, output) = reference
    .split_once('.')
    .with_context(|| format!("invalid artifact '{}': expected step.output=locator", raw))?;
  if locator.trim().is_empty() {
    bail!("invalid artifact '{}': empty locator", raw);
  }

  let declared = workflow
    .get_step(step_id)
    .and_then(|step| step.get_output(output))
    .with_context(|| format!("'{}' is not a declared output of the workflow", reference))?;

  Ok(ArtifactHandle {
    step_id: step_id.to_string(),
    output: output.to_string(),
    kind: declared.kind.clone(),
    locator: locator.to_string(),
  })
}

fn template(minimal: bool, domains: Option<Vec<String>>) -> Result<WorkflowDef> {
  let mut options = if minimal {
    TemplateOptions::minimal()
  } else {
    TemplateOptions::full()
  };
  if let Some(domains) = domains {
    options.domains = domains
      .into_iter()
      .map(|d| d.trim().to_uppercase())
      .filter(|d| !d.is_empty() && d != SUBJECT_LEVEL_DOMAIN)
      .collect();
  }
  adam_tfl_template(&options).context("failed to build template")
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;
  use trialflow_config::{ArtifactKind, ProjectDefaults};

  fn full_workflow() -> Workflow {
    let def = template(false, None).unwrap();
    StandardResolver::new(ProjectDefaults::default())
      .resolve(def)
      .unwrap()
  }

  #[test]
  fn test_cli_definition() {
    Cli::command().debug_assert();
  }

  #[test]
  fn test_parse_run_arguments() {
    let cli = Cli::try_parse_from([
      "trialflow",
      "run",
      "adam_tfl.json",
      "--root-input",
      "snapshot:SDTMBLIND@3",
      "--dry-run",
    ])
    .unwrap();

    match cli.command {
      Some(Commands::Run {
        root_input,
        dry_run,
        ..
      }) => {
        assert_eq!(root_input.to_string(), "snapshot:SDTMBLIND@3");
        assert!(dry_run);
      }
      _ => panic!("expected run command"),
    }

    assert!(
      Cli::try_parse_from(["trialflow", "run", "adam.json", "--root-input", " "]).is_err()
    );
  }

  #[test]
  fn test_parse_artifact() {
    let workflow = full_workflow();

    let handle = parse_artifact(&workflow, "adsl.adsl=/mnt/artifacts/adsl.sas7bdat").unwrap();
    assert_eq!(handle.step_id, "adsl");
    assert_eq!(handle.kind, ArtifactKind::dataset("sas7bdat"));
    assert_eq!(handle.locator, "/mnt/artifacts/adsl.sas7bdat");

    assert!(parse_artifact(&workflow, "adsl=/mnt/artifacts/adsl.sas7bdat").is_err());
    assert!(parse_artifact(&workflow, "adsl.adsl=").is_err());
    assert!(parse_artifact(&workflow, "adsl.log=/mnt/artifacts/adsl.log").is_err());
  }

  #[test]
  fn test_bundled_workflows_match_template() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("workflows");
    let config = Config::default();

    let adam_tfl = load_workflow(&dir.join("adam_tfl.json"), &config).unwrap();
    assert_eq!(adam_tfl, full_workflow());

    let adam = load_workflow(&dir.join("adam.json"), &config).unwrap();
    let expected = StandardResolver::default()
      .resolve(template(true, None).unwrap())
      .unwrap();
    assert_eq!(adam, expected);
  }

  #[test]
  fn test_template_domains() {
    let def = template(false, Some(vec!["adsl".to_string(), "adae".to_string()])).unwrap();
    let ids: Vec<&str> = def.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, ["adsl", "adae", "t_pop"]);

    let def = template(true, None).unwrap();
    assert_eq!(def.steps.len(), 1);
  }
}
