//! Execution events and notifiers for observability.
//!
//! Events are emitted during workflow execution to allow consumers to observe
//! progress, persist state, stream to UIs, etc. They are emitted from the single
//! task driving the scheduler, so their order is the order things happened in.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use trialflow_job::ArtifactHandle;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  /// A step has been handed to the job service.
  StepSubmitted {
    execution_id: String,
    step_id: String,
  },

  /// A step's job finished and produced all declared outputs.
  StepCompleted {
    execution_id: String,
    step_id: String,
    job_id: String,
    outputs: Vec<ArtifactHandle>,
  },

  /// A step has failed.
  StepFailed {
    execution_id: String,
    step_id: String,
    error: String,
  },

  /// A step will not be submitted because `failed_step` failed.
  StepSkipped {
    execution_id: String,
    step_id: String,
    failed_step: String,
  },

  /// Workflow execution has completed successfully.
  WorkflowCompleted { execution_id: String },

  /// Workflow execution has failed.
  WorkflowFailed { execution_id: String, error: String },
}

impl ExecutionEvent {
  /// Stable event name, matching the tracing event names.
  pub fn name(&self) -> &'static str {
    match self {
      Self::WorkflowStarted { .. } => "workflow_started",
      Self::StepSubmitted { .. } => "step_submitted",
      Self::StepCompleted { .. } => "step_completed",
      Self::StepFailed { .. } => "step_failed",
      Self::StepSkipped { .. } => "step_skipped",
      Self::WorkflowCompleted { .. } => "workflow_completed",
      Self::WorkflowFailed { .. } => "workflow_failed",
    }
  }

  pub fn step_id(&self) -> Option<&str> {
    match self {
      Self::StepSubmitted { step_id, .. }
      | Self::StepCompleted { step_id, .. }
      | Self::StepFailed { step_id, .. }
      | Self::StepSkipped { step_id, .. } => Some(step_id),
      _ => None,
    }
  }
}

/// Trait for receiving execution events.
///
/// The runtime calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  /// Create a new channel notifier.
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
