//! Trialflow Runtime
//!
//! This crate executes a locked workflow against a [`trialflow_job::JobService`].
//! Steps are submitted in a stable topological order once every step they read
//! from has finished, and the handles each job produces are threaded into the
//! inputs of the steps that consume them.
//!
//! The main entry point is [`Runtime::invoke`]. [`Runtime::invoke_step`] runs a
//! single step with caller-supplied upstream handles.

mod error;
mod events;
mod input;
mod result;
mod runtime;

pub use error::RuntimeError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use input::{check_outputs, job_spec, resolve_inputs};
pub use result::{InvokeResult, StepResult};
pub use runtime::{FailurePolicy, Runtime, RuntimeConfig, RuntimeSettings};
