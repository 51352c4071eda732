//! Pipeline builder with validation.

use super::{PipelineDefinition, StageSpec, TopologyGraph};
use crate::errors::{ContractErrorInfo, TopologyValidationError};
use crate::utils::is_valid_resource_name;
use tracing::{debug, info};

/// Builder for creating validated pipeline definitions.
///
/// Stage-local rules are checked as each stage is added; artifact wiring is
/// checked across all stages in [`PipelineBuilder::build`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// Id of the stack the pipeline lives in.
    stack_id: String,
    /// The pipeline name.
    name: String,
    /// Stages in declaration order.
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(stack_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stack_id: stack_id.into(),
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid on its own, its name is
    /// taken, or source actions are misplaced.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, TopologyValidationError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Adds a stage in place.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineBuilder::stage`].
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), TopologyValidationError> {
        spec.validate()?;

        if self.stages.iter().any(|s| s.name == spec.name) {
            return Err(TopologyValidationError::new(format!(
                "Duplicate stage '{}'",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "TOPOLOGY-DUPLICATE-STAGE",
                "Stage names must be unique within a pipeline",
            )));
        }

        if self.stages.is_empty() {
            if !spec.is_source_only() {
                return Err(TopologyValidationError::new(format!(
                    "First stage '{}' must contain only source actions",
                    spec.name
                ))
                .with_stages(vec![spec.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "TOPOLOGY-SOURCE-PLACEMENT",
                        "A pipeline starts with a stage made only of source actions",
                    )
                    .with_fix_hint("Declare the source stage first."),
                ));
            }
        } else if spec.has_source_actions() {
            return Err(TopologyValidationError::new(format!(
                "Stage '{}' contains a source action but is not the first stage",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "TOPOLOGY-SOURCE-PLACEMENT",
                "Source actions may only appear in the first stage",
            )));
        }

        debug!(pipeline = %self.name, stage = %spec.name, actions = spec.actions.len(), "Added stage");
        self.stages.push(spec);
        Ok(())
    }

    /// Builds the pipeline definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline name is invalid, there are fewer than
    /// two stages, or the artifact wiring is invalid.
    pub fn build(self) -> Result<PipelineDefinition, TopologyValidationError> {
        if !is_valid_resource_name(&self.name) {
            return Err(TopologyValidationError::new(format!(
                "Pipeline name '{}' is not valid",
                self.name
            ))
            .with_error_info(ContractErrorInfo::new(
                "TOPOLOGY-INVALID-NAME",
                "Pipeline names use letters, digits and . @ _ - (at most 100)",
            )));
        }

        if self.stages.len() < 2 {
            return Err(TopologyValidationError::new(format!(
                "Pipeline '{}' has {} stage(s); at least two are required",
                self.name,
                self.stages.len()
            ))
            .with_error_info(
                ContractErrorInfo::new("TOPOLOGY-TOO-FEW-STAGES", "A pipeline needs a source stage and at least one more")
                    .with_fix_hint("Add a build or deploy stage after the source stage."),
            ));
        }

        let graph = TopologyGraph::build(&self.stages)?;
        info!(
            pipeline = %self.name,
            stages = self.stages.len(),
            order = ?graph.execution_order(),
            "Pipeline topology validated"
        );

        Ok(PipelineDefinition::new(self.stack_id, self.name, self.stages, graph))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildspec::{BuildProject, BuildSpec};
    use crate::core::{ActionSpec, Artifact, SourceProvider, SourceTrigger, DEFAULT_APPROVAL_TIMEOUT};

    fn source(output: &Artifact) -> StageSpec {
        StageSpec::new("Source").with_action(ActionSpec::source(
            "Fetch",
            SourceProvider::CodeCommit {
                repository_name: "repo".to_string(),
            },
            "master",
            SourceTrigger::Poll,
            output,
        ))
    }

    fn gate(name: &str) -> StageSpec {
        StageSpec::new(name).with_action(ActionSpec::manual_approval("Review", DEFAULT_APPROVAL_TIMEOUT))
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("stack", "test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_build_success() {
        let src = Artifact::new("source_output");
        let definition = PipelineBuilder::new("stack", "test")
            .stage(source(&src))
            .unwrap()
            .stage(gate("Approve"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(definition.name(), "test");
        assert_eq!(definition.stack_id(), "stack");
        assert_eq!(definition.stage_names(), vec!["Source", "Approve"]);
    }

    #[test]
    fn test_first_stage_must_be_source() {
        let err = PipelineBuilder::new("stack", "test").stage(gate("Approve")).unwrap_err();
        assert_eq!(err.code(), Some("TOPOLOGY-SOURCE-PLACEMENT"));
    }

    #[test]
    fn test_source_only_in_first_stage() {
        let a = Artifact::new("a");
        let b = Artifact::new("b");
        let mut second = source(&b);
        second.name = "Again".to_string();

        let err = PipelineBuilder::new("stack", "test")
            .stage(source(&a))
            .unwrap()
            .stage(second)
            .unwrap_err();
        assert_eq!(err.code(), Some("TOPOLOGY-SOURCE-PLACEMENT"));
    }

    #[test]
    fn test_duplicate_stage() {
        let src = Artifact::new("source_output");
        let err = PipelineBuilder::new("stack", "test")
            .stage(source(&src))
            .unwrap()
            .stage(gate("Approve"))
            .unwrap()
            .stage(gate("Approve"))
            .unwrap_err();
        assert_eq!(err.code(), Some("TOPOLOGY-DUPLICATE-STAGE"));
    }

    #[test]
    fn test_too_few_stages() {
        let src = Artifact::new("source_output");
        let err = PipelineBuilder::new("stack", "test")
            .stage(source(&src))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("TOPOLOGY-TOO-FEW-STAGES"));
    }

    #[test]
    fn test_wiring_checked_on_build() {
        let src = Artifact::new("source_output");
        let stray = Artifact::new("stray");
        let build = StageSpec::new("Build").with_action(ActionSpec::build(
            "Compile",
            BuildProject::new("project", BuildSpec::synth("cdk.out", "**/*")),
            &stray,
            &[],
        ));

        let err = PipelineBuilder::new("stack", "test")
            .stage(source(&src))
            .unwrap()
            .stage(build)
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("TOPOLOGY-ARTIFACT-UNPRODUCED"));
    }

    #[test]
    fn test_invalid_pipeline_name() {
        let src = Artifact::new("source_output");
        let err = PipelineBuilder::new("stack", "my pipeline")
            .stage(source(&src))
            .unwrap()
            .stage(gate("Approve"))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("TOPOLOGY-INVALID-NAME"));
    }
}
