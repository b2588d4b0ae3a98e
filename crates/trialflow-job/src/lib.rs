//! Trialflow Job
//!
//! The capability the runtime depends on to get work done: submit one job to the
//! external execution platform and get back a handle per declared output.
//!
//! - [`JobService`] is the narrow interface the runtime is generic over.
//! - [`HttpJobService`] talks to the platform's job API.
//! - [`FakeJobService`] is a deterministic in-memory implementation for tests and
//!   dry runs. It records every submission and can be scripted per step.

mod error;
mod fake;
mod http;
mod service;
mod spec;

pub use error::JobError;
pub use fake::{FakeBehavior, FakeJobService};
pub use http::{HttpJobService, HttpServiceConfig, JobStatus};
pub use service::JobService;
pub use spec::{ArtifactHandle, JobInput, JobInputValue, JobOutputs, JobSpec};
