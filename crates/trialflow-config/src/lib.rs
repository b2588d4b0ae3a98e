//! Trialflow Config
//!
//! This crate contains the serializable workflow definition types for trialflow.
//! A definition describes an ordered list of steps, each of which is a batch job
//! (an analysis script run in a named environment) with declared inputs and outputs.
//! Steps are wired together by referencing the outputs of earlier steps.
//!
//! Definitions can be:
//! - Loaded from JSON files (via the CLI)
//! - Built programmatically with [`WorkflowBuilder`]
//! - Generated from the built-in SDTM → ADaM → TFL template in [`clinical`]
//!
//! The resolver takes these types, applies project defaults, validates the graph,
//! and produces a locked workflow for the runtime.

mod artifact;
mod builder;
pub mod clinical;
mod defaults;
mod error;
mod input;
mod root;
mod step;
mod workflow;

pub use artifact::{ArtifactKind, ArtifactRef};
pub use builder::{StepOutputs, StepSpec, WorkflowBuilder};
pub use defaults::ProjectDefaults;
pub use error::DefinitionError;
pub use input::{InputDef, InputSource};
pub use root::RootInput;
pub use step::{DatasetSnapshotRef, OutputDef, StepDef};
pub use workflow::{ParameterSpec, WorkflowDef, WorkflowOutputDef};
