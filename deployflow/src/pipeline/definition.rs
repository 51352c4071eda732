//! The validated pipeline definition.

use super::{StageSpec, TopologyGraph};
use crate::buildspec::BuildProject;
use crate::core::{ActionKind, ActionSpec};

/// A pipeline whose stages and artifact wiring have been validated.
///
/// Produced only by [`super::PipelineBuilder::build`]; immutable afterwards.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    stack_id: String,
    name: String,
    stages: Vec<StageSpec>,
    graph: TopologyGraph,
}

impl PipelineDefinition {
    pub(crate) fn new(
        stack_id: String,
        name: String,
        stages: Vec<StageSpec>,
        graph: TopologyGraph,
    ) -> Self {
        Self {
            stack_id,
            name,
            stages,
            graph,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the id of the stack the pipeline is synthesized into.
    #[must_use]
    pub fn stack_id(&self) -> &str {
        &self.stack_id
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the stage names in declaration order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the validated artifact graph.
    #[must_use]
    pub fn graph(&self) -> &TopologyGraph {
        &self.graph
    }

    /// Iterates over every action with its stage name.
    pub fn actions(&self) -> impl Iterator<Item = (&str, &ActionSpec)> {
        self.stages
            .iter()
            .flat_map(|s| s.actions.iter().map(move |a| (s.name.as_str(), a)))
    }

    /// Distinct build projects referenced by build actions, in declaration order.
    #[must_use]
    pub fn build_projects(&self) -> Vec<&BuildProject> {
        let mut projects: Vec<&BuildProject> = Vec::new();
        for (_, action) in self.actions() {
            if let ActionKind::Build { project } = &action.kind {
                if !projects.iter().any(|p| p.name == project.name) {
                    projects.push(project);
                }
            }
        }
        projects
    }
}
