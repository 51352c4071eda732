//! Pipeline topology definition.
//!
//! This module provides:
//! - Stage specifications and run-order grouping
//! - A validating pipeline builder
//! - The artifact wiring graph and its validator
//! - The source → build → deploy topology itself

mod builder;
mod dag;
mod definition;
mod spec;
mod topology;

pub use builder::PipelineBuilder;
pub use dag::{ActionRef, TopologyGraph};
pub use definition::PipelineDefinition;
pub use spec::StageSpec;
pub use topology::{
    define_build_stage, define_deploy_stage, define_source_stage, sample_pipeline,
    BUILD_ACTION, BUILD_STAGE, CHANGE_SET_ACTION, DEPLOY_STAGE, EXECUTE_ACTION,
    OUTPUT_ARTIFACT, REVIEW_ACTION, SOURCE_ACTION, SOURCE_ARTIFACT, SOURCE_STAGE,
};
