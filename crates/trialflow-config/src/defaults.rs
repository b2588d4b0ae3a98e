use serde::{Deserialize, Serialize};

use crate::step::DatasetSnapshotRef;

/// Project-level settings applied to steps that leave them unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDefaults {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hardware_tier: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dataset_snapshots: Vec<DatasetSnapshotRef>,
}
