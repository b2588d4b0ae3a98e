use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;
use crate::step::DatasetSnapshotRef;

const SNAPSHOT_PREFIX: &str = "snapshot:";

/// The value a workflow is invoked with.
///
/// Parsed from text: `snapshot:<id>@<version>` is a dataset snapshot, anything else
/// is taken as a filesystem path to the root SDTM dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RootInput {
  Path(String),
  Snapshot(DatasetSnapshotRef),
}

impl RootInput {
  /// The literal string handed to steps bound to the workflow parameter.
  pub fn as_literal(&self) -> String {
    match self {
      Self::Path(path) => path.clone(),
      Self::Snapshot(snapshot) => snapshot.to_string(),
    }
  }
}

impl fmt::Display for RootInput {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Path(path) => f.write_str(path),
      Self::Snapshot(snapshot) => write!(f, "{}{}", SNAPSHOT_PREFIX, snapshot),
    }
  }
}

impl FromStr for RootInput {
  type Err = DefinitionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
      return Err(DefinitionError::InvalidRootInput(s.to_string()));
    }

    let Some(rest) = trimmed.strip_prefix(SNAPSHOT_PREFIX) else {
      return Ok(Self::Path(trimmed.to_string()));
    };

    let invalid = || DefinitionError::InvalidRootInput(s.to_string());
    let (id, version) = rest.rsplit_once('@').ok_or_else(invalid)?;
    if id.is_empty() {
      return Err(invalid());
    }
    let version = version.parse::<u32>().map_err(|_| invalid())?;
    Ok(Self::Snapshot(DatasetSnapshotRef::new(id, version)))
  }
}

impl TryFrom<String> for RootInput {
  type Error = DefinitionError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<RootInput> for String {
  fn from(root: RootInput) -> Self {
    root.to_string()
  }
}
