//! Tracing subscriber setup for the CLI.
//!
//! Logs go to stderr so that stdout carries only command output (plans, templates,
//! result JSON). `RUST_LOG` overrides the default filter.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter: info for every trialflow crate, warnings for everything else.
pub const DEFAULT_FILTER: &str = "warn,trialflow=info,trialflow_job=info,trialflow_resolver=info,trialflow_runtime=info,trialflow_workflow=info";

pub fn init_logging(json: bool, verbose: bool) -> Result<()> {
  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) if verbose => EnvFilter::new(DEFAULT_FILTER.replace("=info", "=debug")),
    Err(_) => EnvFilter::new(DEFAULT_FILTER),
  };

  let registry = tracing_subscriber::registry().with(filter);
  let result = if json {
    registry
      .with(fmt::layer().json().with_writer(std::io::stderr))
      .try_init()
  } else {
    registry
      .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
      .try_init()
  };

  result.map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
