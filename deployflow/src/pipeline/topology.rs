//! The source → build → deploy pipeline.

use super::{PipelineBuilder, PipelineDefinition, StageSpec};
use crate::config::PipelineConfig;
use crate::core::{ActionSpec, Artifact};
use crate::errors::TopologyValidationError;

/// Name of the source stage.
pub const SOURCE_STAGE: &str = "Source";
/// Name of the build stage.
pub const BUILD_STAGE: &str = "Build";
/// Name of the deploy stage.
pub const DEPLOY_STAGE: &str = "CloudFormation_Deploy";

/// Name of the source action.
pub const SOURCE_ACTION: &str = "CodeCommit_Source";
/// Name of the build action.
pub const BUILD_ACTION: &str = "build_action";
/// Name of the change-set creation action.
pub const CHANGE_SET_ACTION: &str = "CreateCFnChangeSet";
/// Name of the approval gate.
pub const REVIEW_ACTION: &str = "Review";
/// Name of the change-set execution action.
pub const EXECUTE_ACTION: &str = "DeployResources";

/// Artifact written by the source stage.
pub const SOURCE_ARTIFACT: &str = "source_output";
/// Artifact written by the build stage.
pub const OUTPUT_ARTIFACT: &str = "output_data";

/// Declares the source stage and returns it with the artifact it produces.
#[must_use]
pub fn define_source_stage(config: &PipelineConfig) -> (StageSpec, Artifact) {
    let source_output = Artifact::new(SOURCE_ARTIFACT);
    let action = ActionSpec::source(
        SOURCE_ACTION,
        config.source.provider.clone(),
        config.source.branch.clone(),
        config.source.trigger,
        &source_output,
    );
    (StageSpec::new(SOURCE_STAGE).with_action(action), source_output)
}

/// Declares the build stage reading `input` and returns it with its output artifact.
#[must_use]
pub fn define_build_stage(input: &Artifact, config: &PipelineConfig) -> (StageSpec, Artifact) {
    let output_data = Artifact::new(OUTPUT_ARTIFACT);
    let action = ActionSpec::build(
        BUILD_ACTION,
        config.build.to_project(),
        input,
        std::slice::from_ref(&output_data),
    );
    (StageSpec::new(BUILD_STAGE).with_action(action), output_data)
}

/// Declares the deploy stage: create change-set, review, execute.
///
/// Run orders 1 < 2 < 3 make the change-set exist before anyone reviews it
/// and keep execution behind the approval.
#[must_use]
pub fn define_deploy_stage(input: &Artifact, config: &PipelineConfig) -> StageSpec {
    let deploy = &config.deploy;
    StageSpec::new(DEPLOY_STAGE).with_actions([
        ActionSpec::create_replace_change_set(
            CHANGE_SET_ACTION,
            deploy.stack_name.clone(),
            deploy.change_set_name.clone(),
            input.at_path(deploy.template_file.clone()),
            deploy.admin_permissions,
        )
        .with_run_order(1),
        ActionSpec::manual_approval(REVIEW_ACTION, deploy.approval_timeout())
            .with_notes(format!(
                "Review change-set {} for stack {} before it is executed",
                deploy.change_set_name, deploy.stack_name
            ))
            .with_run_order(2),
        ActionSpec::execute_change_set(
            EXECUTE_ACTION,
            deploy.stack_name.clone(),
            deploy.change_set_name.clone(),
        )
        .with_run_order(3),
    ])
}

/// Composes the three stages into a validated pipeline.
///
/// # Errors
///
/// Returns an error if the configured values produce an invalid topology,
/// for example a build timeout outside the runner's range.
pub fn sample_pipeline(config: &PipelineConfig) -> Result<PipelineDefinition, TopologyValidationError> {
    let (source, source_output) = define_source_stage(config);
    let (build, output_data) = define_build_stage(&source_output, config);
    let deploy = define_deploy_stage(&output_data, config);

    PipelineBuilder::new(config.stack_id.clone(), config.pipeline_name.clone())
        .stage(source)?
        .stage(build)?
        .stage(deploy)?
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActionCategory, ActionKind};

    #[test]
    fn test_stage_order_is_declaration_order() {
        let definition = sample_pipeline(&PipelineConfig::default()).unwrap();
        assert_eq!(
            definition.stage_names(),
            vec![SOURCE_STAGE, BUILD_STAGE, DEPLOY_STAGE]
        );
        assert_eq!(
            definition.graph().execution_order(),
            &[SOURCE_STAGE.to_string(), BUILD_STAGE.to_string(), DEPLOY_STAGE.to_string()]
        );
    }

    #[test]
    fn test_build_input_matches_source_output() {
        let definition = sample_pipeline(&PipelineConfig::default()).unwrap();
        let source = definition.stage(SOURCE_STAGE).unwrap();
        let build = definition.stage(BUILD_STAGE).unwrap();

        let source_outputs: Vec<&str> = source.outputs().map(Artifact::name).collect();
        let build_inputs: Vec<&str> = build.inputs().map(Artifact::name).collect();
        assert_eq!(source_outputs, vec![SOURCE_ARTIFACT]);
        assert_eq!(build_inputs, source_outputs);
    }

    #[test]
    fn test_deploy_stage_run_orders() {
        let definition = sample_pipeline(&PipelineConfig::default()).unwrap();
        let deploy = definition.stage(DEPLOY_STAGE).unwrap();

        let shape: Vec<(&str, u32, ActionCategory)> = deploy
            .actions
            .iter()
            .map(|a| (a.name.as_str(), a.run_order, a.category()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (CHANGE_SET_ACTION, 1, ActionCategory::Deploy),
                (REVIEW_ACTION, 2, ActionCategory::Approval),
                (EXECUTE_ACTION, 3, ActionCategory::Deploy),
            ]
        );
    }

    #[test]
    fn test_change_set_reads_template_from_build_output() {
        let definition = sample_pipeline(&PipelineConfig::default()).unwrap();
        let action = definition
            .stage(DEPLOY_STAGE)
            .and_then(|s| s.action(CHANGE_SET_ACTION))
            .unwrap();

        match &action.kind {
            ActionKind::CreateReplaceChangeSet {
                stack_name,
                change_set_name,
                template_path,
                admin_permissions,
            } => {
                assert_eq!(stack_name, "TestApiStack");
                assert_eq!(change_set_name, "TestApiStackChangeSet");
                assert_eq!(template_path.location(), "output_data/hoge.template.json");
                assert!(*admin_permissions);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(
            definition.graph().producer_of(OUTPUT_ARTIFACT).unwrap().to_string(),
            format!("{BUILD_STAGE}/{BUILD_ACTION}")
        );
    }

    #[test]
    fn test_build_project_settings() {
        let definition = sample_pipeline(&PipelineConfig::default()).unwrap();
        let projects = definition.build_projects();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "sample_build_project");
        assert_eq!(projects[0].timeout_minutes(), 10);
    }

    #[test]
    fn test_invalid_build_timeout_surfaces() {
        let mut config = PipelineConfig::default();
        config.build.timeout_minutes = 1;

        let err = sample_pipeline(&config).unwrap_err();
        assert_eq!(err.code(), Some("BUILDSPEC-TIMEOUT"));
        assert_eq!(err.stages, vec![BUILD_STAGE.to_string()]);
    }

    #[test]
    fn test_oversized_build_timeout_is_an_error() {
        let mut config = PipelineConfig::default();
        config.build.timeout_minutes = u64::MAX;

        let err = sample_pipeline(&config).unwrap_err();
        assert_eq!(err.code(), Some("BUILDSPEC-TIMEOUT"));
    }
}
