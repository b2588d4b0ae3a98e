use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

/// The kind of file a step produces.
///
/// Serialized as `"dataset:<format>"` or `"report:<format>"`, e.g. `"dataset:sas7bdat"`
/// for an ADaM dataset and `"report:pdf"` for a TFL report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArtifactKind {
  /// A tabular dataset file.
  Dataset { format: String },
  /// A rendered report file.
  Report { format: String },
}

impl ArtifactKind {
  pub fn dataset(format: impl Into<String>) -> Self {
    Self::Dataset {
      format: format.into(),
    }
  }

  pub fn report(format: impl Into<String>) -> Self {
    Self::Report {
      format: format.into(),
    }
  }

  /// File format, e.g. `sas7bdat` or `pdf`.
  pub fn format(&self) -> &str {
    match self {
      Self::Dataset { format } | Self::Report { format } => format,
    }
  }
}

impl fmt::Display for ArtifactKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Dataset { format } => write!(f, "dataset:{}", format),
      Self::Report { format } => write!(f, "report:{}", format),
    }
  }
}

impl FromStr for ArtifactKind {
  type Err = DefinitionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || DefinitionError::InvalidArtifactKind(s.to_string());
    let (class, format) = s.split_once(':').ok_or_else(invalid)?;
    if format.is_empty() {
      return Err(invalid());
    }
    match class {
      "dataset" => Ok(Self::dataset(format)),
      "report" => Ok(Self::report(format)),
      _ => Err(invalid()),
    }
  }
}

impl TryFrom<String> for ArtifactKind {
  type Error = DefinitionError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<ArtifactKind> for String {
  fn from(kind: ArtifactKind) -> Self {
    kind.to_string()
  }
}

/// Definition-time reference to an output of an earlier step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
  /// The producing step.
  pub step: String,
  /// The output name declared by that step.
  pub output: String,
}

impl ArtifactRef {
  pub fn new(step: impl Into<String>, output: impl Into<String>) -> Self {
    Self {
      step: step.into(),
      output: output.into(),
    }
  }
}

impl fmt::Display for ArtifactRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.step, self.output)
  }
}
