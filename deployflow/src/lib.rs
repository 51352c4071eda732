//! # Deployflow
//!
//! Declares a three-stage continuous-delivery pipeline as a validated graph
//! of stages, actions and artifacts, and synthesizes it into a declarative
//! infrastructure template.
//!
//! - **Topology**: stages run in declaration order; inside a stage, actions
//!   are grouped by run order. Every artifact has exactly one producer and
//!   every consumer runs after it.
//! - **Synthesis**: the same definition always yields a byte-identical
//!   template.
//! - **Simulation**: an [`orchestrator::Orchestrator`] replays runs against
//!   pluggable executors, including the manual approval gate that guards the
//!   change-set execution.
//!
//! ## Quick Start
//!
//! ```rust
//! use deployflow::prelude::*;
//!
//! let config = PipelineConfig::default();
//! let definition = sample_pipeline(&config)?;
//! assert_eq!(definition.stage_names(), vec!["Source", "Build", "CloudFormation_Deploy"]);
//!
//! let template = synthesize(&definition)?;
//! assert_eq!(template.pipeline_stage_names(), definition.stage_names());
//! # Ok::<(), deployflow::errors::DeployflowError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod buildspec;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod synth;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buildspec::{BuildEnvironment, BuildProject, BuildSpec, ComputeType};
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        ActionCategory, ActionKind, ActionSpec, ActionStatus, Artifact, ArtifactPath,
        RejectionReason, RunState, SourceProvider, SourceTrigger,
    };
    pub use crate::errors::{
        ConfigError, ContractErrorInfo, CycleDetectedError, DeployflowError,
        TopologyValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::orchestrator::{
        ActionExecutor, ApprovalGate, CommitEvent, Orchestrator, RunOutcome, RunReport,
        ScriptedExecutor,
    };
    pub use crate::pipeline::{sample_pipeline, PipelineBuilder, PipelineDefinition, StageSpec};
    pub use crate::synth::{synthesize, write_to_dir, Template};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
