//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types of a pipeline topology:
//! - Artifact handles, paths inside artifacts and per-run revisions
//! - Action kinds, categories and run orders
//! - Action and run status enums

mod action;
mod artifact;
mod status;

pub use action::{
    ActionCategory, ActionKind, ActionSpec, SourceProvider, SourceTrigger,
    DEFAULT_APPROVAL_TIMEOUT, MAX_RUN_ORDER,
};
pub use artifact::{Artifact, ArtifactPath, ArtifactRevision};
pub use status::{ActionStatus, RejectionReason, RunState};
