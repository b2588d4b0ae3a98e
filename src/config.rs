//! The `config.json` file in the data directory.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use trialflow_config::ProjectDefaults;
use trialflow_job::HttpServiceConfig;
use trialflow_runtime::RuntimeSettings;

pub const CONFIG_FILE: &str = "config.json";
pub const API_KEY_ENV: &str = "TRIALFLOW_API_KEY";
pub const BASE_URL_ENV: &str = "TRIALFLOW_BASE_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
  /// Execution platform connection. Required unless running with `--dry-run`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub service: Option<HttpServiceConfig>,
  #[serde(default)]
  pub defaults: ProjectDefaults,
  #[serde(default)]
  pub runtime: RuntimeSettings,
}

impl Config {
  /// Load the config file, or the default config if there is none.
  pub fn load(path: &Path) -> Result<Self> {
    if !path.exists() {
      return Ok(Self::default());
    }
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
      .with_context(|| format!("failed to parse config file: {}", path.display()))
  }

  /// Load the config file and apply `TRIALFLOW_*` environment overrides.
  pub fn load_with_env(path: &Path) -> Result<Self> {
    let mut config = Self::load(path)?;
    config.apply_overrides(
      std::env::var(API_KEY_ENV).ok(),
      std::env::var(BASE_URL_ENV).ok(),
    );
    Ok(config)
  }

  /// Override the service section. A base url alone is enough to create it.
  pub fn apply_overrides(&mut self, api_key: Option<String>, base_url: Option<String>) {
    if let Some(base_url) = base_url.filter(|u| !u.trim().is_empty()) {
      match &mut self.service {
        Some(service) => service.base_url = base_url,
        None => self.service = Some(HttpServiceConfig::new(base_url)),
      }
    }
    if let (Some(service), Some(api_key)) = (&mut self.service, api_key) {
      service.api_key = Some(api_key);
    }
  }

  pub fn service_config(&self) -> Result<HttpServiceConfig> {
    self.service.clone().with_context(|| {
      format!(
        "no execution service configured: add a \"service\" section to {} or set {}",
        CONFIG_FILE, BASE_URL_ENV
      )
    })
  }
}
