//! Input bindings for steps.
//!
//! Every input has a name and a source. The source is one of:
//! - a literal JSON value, fixed at definition time
//! - the workflow parameter (the root dataset path or snapshot id)
//! - an output of an earlier step
//!
//! # Examples
//!
//! ```json
//! [
//!   { "name": "sdtm_dataset_snapshot", "source": "parameter" },
//!   { "name": "adsl", "source": "artifact", "step": "adsl", "output": "adsl" },
//!   { "name": "population", "source": "value", "value": "SAFFL" }
//! ]
//! ```

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;

/// A named input binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
  pub name: String,
  #[serde(flatten)]
  pub source: InputSource,
}

impl InputDef {
  pub fn new(name: impl Into<String>, source: InputSource) -> Self {
    Self {
      name: name.into(),
      source,
    }
  }
}

/// Where an input's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputSource {
  /// A literal value.
  Value { value: serde_json::Value },
  /// The value supplied when the workflow is invoked.
  Parameter,
  /// An output produced by an earlier step.
  Artifact(ArtifactRef),
}

impl InputSource {
  /// The upstream reference, if this input is wired to another step.
  pub fn artifact(&self) -> Option<&ArtifactRef> {
    match self {
      Self::Artifact(reference) => Some(reference),
      _ => None,
    }
  }
}
