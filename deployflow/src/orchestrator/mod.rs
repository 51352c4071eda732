//! Run simulator for pipeline definitions.
//!
//! The [`Orchestrator`] plays a [`crate::pipeline::PipelineDefinition`]
//! against an [`ActionExecutor`]. External systems never run here: the
//! executor stands in for the source repository, build runner and
//! deployment engine, and the [`ApprovalGate`] stands in for the operator.

mod approval;
mod executor;
mod report;
mod runner;
mod store;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
pub use executor::{ActionExecutor, ActionInvocation, ActionOutcome, CommitEvent, ScriptedExecutor};
pub use report::{ActionRecord, RunOutcome, RunReport};
pub use runner::Orchestrator;
pub use store::ArtifactStore;
