//! Built-in SDTM → ADaM → TFL workflow template.
//!
//! One parameterised template covers both shapes the pipeline is run in:
//! - [`TemplateOptions::minimal`]: only the ADSL derivation, taking a path to the
//!   SDTM data directory.
//! - [`TemplateOptions::full`]: ADSL, the ADSL-dependent ADaM domains, and the
//!   T_POP population report, taking an SDTM snapshot path and reading the study
//!   metadata snapshot.
//!
//! Graph shape: ADSL depends on the parameter only, every other ADaM domain on the
//! parameter and ADSL, and every report on the domains it lists.

use crate::artifact::{ArtifactKind, ArtifactRef};
use crate::builder::{StepSpec, WorkflowBuilder};
use crate::error::DefinitionError;
use crate::step::DatasetSnapshotRef;
use crate::workflow::{ParameterSpec, WorkflowDef};

pub const SAS_ENVIRONMENT: &str = "SAS Analytics Pro";
pub const ADAM_COMMAND_DIR: &str = "prod/adam_flows";
pub const TFL_COMMAND_DIR: &str = "prod/tfl_flows";
pub const DATASET_FORMAT: &str = "sas7bdat";
pub const REPORT_FORMAT: &str = "pdf";
pub const METADATA_SNAPSHOT_ID: &str = "66a2984f62fa8d3bb129c689";

/// The subject-level domain every other domain is derived against.
pub const SUBJECT_LEVEL_DOMAIN: &str = "ADSL";

/// ADaM domains derived in the full pipeline, besides ADSL.
pub const FULL_DOMAINS: [&str; 5] = ["ADAE", "ADCM", "ADLB", "ADMH", "ADVS"];

/// A TFL report step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSpec {
  /// Report name, e.g. `t_pop`. Also the script stem and output name.
  pub name: String,
  /// ADaM domains the report reads, e.g. `["ADSL"]`.
  pub domains: Vec<String>,
}

impl ReportSpec {
  pub fn new(name: impl Into<String>, domains: &[&str]) -> Self {
    Self {
      name: name.into(),
      domains: domains.iter().map(|d| d.to_string()).collect(),
    }
  }
}

/// Knobs of the clinical template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOptions {
  pub workflow_id: String,
  pub name: String,
  pub parameter: String,
  /// Domains derived after ADSL.
  pub domains: Vec<String>,
  pub reports: Vec<ReportSpec>,
  pub environment: String,
  pub hardware_tier: Option<String>,
  pub metadata_snapshot: Option<DatasetSnapshotRef>,
  /// Also return every ADaM dataset, not only the reports.
  pub expose_datasets: bool,
}

impl TemplateOptions {
  /// ADSL only, from a path to the SDTM directory.
  pub fn minimal() -> Self {
    Self {
      workflow_id: "adam".to_string(),
      name: "ADaM".to_string(),
      parameter: "sdtm_data_path".to_string(),
      domains: Vec::new(),
      reports: Vec::new(),
      environment: SAS_ENVIRONMENT.to_string(),
      hardware_tier: Some("Small".to_string()),
      metadata_snapshot: None,
      expose_datasets: true,
    }
  }

  /// The complete ADaM derivation plus the population table.
  pub fn full() -> Self {
    Self {
      workflow_id: "adam-tfl".to_string(),
      name: "ADaM_TFL".to_string(),
      parameter: "sdtm_dataset_snapshot".to_string(),
      domains: FULL_DOMAINS.iter().map(|d| d.to_string()).collect(),
      reports: vec![ReportSpec::new("t_pop", &[SUBJECT_LEVEL_DOMAIN])],
      environment: SAS_ENVIRONMENT.to_string(),
      hardware_tier: None,
      metadata_snapshot: Some(DatasetSnapshotRef::new(METADATA_SNAPSHOT_ID, 1)),
      expose_datasets: false,
    }
  }

  fn apply_common(&self, mut spec: StepSpec) -> StepSpec {
    spec = spec.environment(&self.environment);
    if let Some(tier) = &self.hardware_tier {
      spec = spec.hardware_tier(tier);
    }
    if let Some(snapshot) = &self.metadata_snapshot {
      spec = spec.dataset_snapshot(snapshot.clone());
    }
    spec
  }
}

/// Build the template into a workflow definition.
///
/// Fails if a report lists a domain the options do not derive, or if a domain is
/// listed twice.
pub fn adam_tfl_template(options: &TemplateOptions) -> Result<WorkflowDef, DefinitionError> {
  let parameter = ParameterSpec::new(&options.parameter)
    .with_description("Root of the SDTM dataset: a directory path or a dataset snapshot");
  let mut builder = WorkflowBuilder::new(&options.name, parameter).with_id(&options.workflow_id);

  let mut datasets: Vec<(String, ArtifactRef)> = Vec::new();

  let adsl_output = SUBJECT_LEVEL_DOMAIN.to_lowercase();
  let adsl = builder.step(
    options.apply_common(
      StepSpec::new(&adsl_output, adam_command(SUBJECT_LEVEL_DOMAIN))
        .title(format!("Create {} Dataset", SUBJECT_LEVEL_DOMAIN))
        .input_parameter(&options.parameter)
        .output(&adsl_output, ArtifactKind::dataset(DATASET_FORMAT)),
    ),
  )?;
  let adsl_ref = adsl.get(&adsl_output)?.clone();
  datasets.push((SUBJECT_LEVEL_DOMAIN.to_string(), adsl_ref.clone()));

  for domain in &options.domains {
    let output = domain.to_lowercase();
    let step = builder.step(
      options.apply_common(
        StepSpec::new(&output, adam_command(domain))
          .title(format!("Create {} Dataset", domain.to_uppercase()))
          .input_parameter(&options.parameter)
          .input_artifact(&adsl_output, &adsl_ref)
          .output(&output, ArtifactKind::dataset(DATASET_FORMAT)),
      ),
    )?;
    datasets.push((domain.to_uppercase(), step.get(&output)?.clone()));
  }

  if options.expose_datasets {
    for (domain, reference) in &datasets {
      builder.output(domain.to_lowercase(), reference)?;
    }
  }

  for report in &options.reports {
    let command = format!("{}/{}.sas", TFL_COMMAND_DIR, report.name);
    let mut spec = StepSpec::new(&report.name, command)
      .title(format!("Create {} Report", report.name.to_uppercase()));
    for domain in &report.domains {
      let upper = domain.to_uppercase();
      let (_, reference) = datasets
        .iter()
        .find(|(d, _)| *d == upper)
        .ok_or_else(|| DefinitionError::UnresolvedInput {
          step_id: report.name.clone(),
          input: domain.to_lowercase(),
          reference: format!("{}.{}", domain.to_lowercase(), domain.to_lowercase()),
        })?;
      spec = spec.input_artifact(domain.to_lowercase(), reference);
    }
    spec = spec.output(&report.name, ArtifactKind::report(REPORT_FORMAT));
    let outputs = builder.step(options.apply_common(spec))?;
    builder.output(&report.name, outputs.get(&report.name)?)?;
  }

  Ok(builder.build())
}

fn adam_command(domain: &str) -> String {
  format!("{}/{}.sas", ADAM_COMMAND_DIR, domain.to_uppercase())
}
