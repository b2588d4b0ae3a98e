//! Trialflow Workflow
//!
//! This crate provides the "locked" workflow representation for trialflow.
//! A locked workflow is a validated, resolved form of a workflow definition
//! that is ready for execution.
//!
//! Key differences from `trialflow-config`:
//! - Project defaults have been applied (every step has an environment)
//! - Every artifact reference points at a declared output
//! - The dependency graph is acyclic and has a stable topological order

mod error;
mod graph;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use workflow::{Step, Workflow};
