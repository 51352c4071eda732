//! Artifact wiring graph and its validator.
//!
//! Stages are nodes; a stage depends on every stage that produces an
//! artifact it consumes. The validator enforces single-producer wiring,
//! monotonic run-order gating inside a stage, and acyclicity, and yields the
//! execution order.

use super::StageSpec;
use crate::errors::{ContractErrorInfo, CycleDetectedError, TopologyValidationError};
use crate::utils::validate_dag;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A reference to an action by stage and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    /// The stage name.
    pub stage: String,
    /// Position of the stage in declaration order.
    pub stage_index: usize,
    /// The action name.
    pub action: String,
    /// The action's run order.
    pub run_order: u32,
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.action)
    }
}

/// The validated data-flow graph of a pipeline.
#[derive(Debug, Clone)]
pub struct TopologyGraph {
    /// Artifact name to its single producer.
    producers: BTreeMap<String, ActionRef>,
    /// Artifact name to every consumer, in declaration order.
    consumers: BTreeMap<String, Vec<ActionRef>>,
    /// Stage name to the stages it depends on.
    stage_dependencies: BTreeMap<String, Vec<String>>,
    /// Stage execution order.
    execution_order: Vec<String>,
}

impl TopologyGraph {
    /// Builds and validates the graph for `stages` in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if an artifact has two producers, an input is never
    /// produced, a same-stage input is not produced at a lower run order, the
    /// stages form a cycle, or a stage consumes from a later stage.
    pub fn build(stages: &[StageSpec]) -> Result<Self, TopologyValidationError> {
        let mut producers: BTreeMap<String, ActionRef> = BTreeMap::new();

        for (stage_index, stage) in stages.iter().enumerate() {
            for action in &stage.actions {
                let here = ActionRef {
                    stage: stage.name.clone(),
                    stage_index,
                    action: action.name.clone(),
                    run_order: action.run_order,
                };
                for output in &action.outputs {
                    if let Some(existing) = producers.get(output.name()) {
                        return Err(TopologyValidationError::new(format!(
                            "Artifact '{}' is produced by both '{}' and '{}'",
                            output, existing, here
                        ))
                        .with_stages(vec![existing.stage.clone(), here.stage.clone()])
                        .with_error_info(
                            ContractErrorInfo::new(
                                "TOPOLOGY-DUPLICATE-PRODUCER",
                                "Each artifact must have exactly one producer",
                            )
                            .with_context_entry("artifact", output.name())
                            .with_fix_hint("Give each action's output a distinct artifact name."),
                        ));
                    }
                    producers.insert(output.name().to_string(), here.clone());
                }
            }
        }

        let mut consumers: BTreeMap<String, Vec<ActionRef>> = BTreeMap::new();
        let mut stage_dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (stage_index, stage) in stages.iter().enumerate() {
            for action in &stage.actions {
                let here = ActionRef {
                    stage: stage.name.clone(),
                    stage_index,
                    action: action.name.clone(),
                    run_order: action.run_order,
                };
                for input in &action.inputs {
                    let Some(producer) = producers.get(input.name()) else {
                        return Err(TopologyValidationError::new(format!(
                            "Action '{}' consumes artifact '{}' which no action produces",
                            here, input
                        ))
                        .with_stages(vec![stage.name.clone()])
                        .with_error_info(
                            ContractErrorInfo::new(
                                "TOPOLOGY-ARTIFACT-UNPRODUCED",
                                format!("Artifact '{input}' has no producer"),
                            )
                            .with_fix_hint("Declare the artifact as an output of an upstream action."),
                        ));
                    };

                    if producer.stage == stage.name {
                        if producer.run_order >= action.run_order {
                            return Err(TopologyValidationError::new(format!(
                                "Action '{}' (run order {}) consumes '{}' produced by '{}' (run order {})",
                                here, action.run_order, input, producer, producer.run_order
                            ))
                            .with_stages(vec![stage.name.clone()])
                            .with_error_info(
                                ContractErrorInfo::new(
                                    "TOPOLOGY-RUN-ORDER-WIRING",
                                    "Within a stage, a consumer must run after its producer",
                                )
                                .with_fix_hint("Give the consumer a higher run order than the producer."),
                            ));
                        }
                    } else {
                        let deps = stage_dependencies.entry(stage.name.clone()).or_default();
                        if !deps.contains(&producer.stage) {
                            deps.push(producer.stage.clone());
                        }
                    }

                    debug!(artifact = %input, producer = %producer, consumer = %here, "Wired artifact");
                    consumers.entry(input.name().to_string()).or_default().push(here.clone());
                }
            }
        }

        let names: Vec<String> = stages.iter().map(|s| s.name.clone()).collect();
        let execution_order = validate_dag(&names, &stage_dependencies)
            .map_err(|e| TopologyValidationError::from(CycleDetectedError::new(e.cycle_path)))?;

        for (consumer_index, stage) in stages.iter().enumerate() {
            for input in stage.inputs() {
                if let Some(producer) = producers.get(input.name()) {
                    if producer.stage_index > consumer_index {
                        return Err(TopologyValidationError::new(format!(
                            "Stage '{}' consumes '{}' from later stage '{}'",
                            stage.name, input, producer.stage
                        ))
                        .with_stages(vec![stage.name.clone(), producer.stage.clone()])
                        .with_error_info(
                            ContractErrorInfo::new(
                                "TOPOLOGY-FORWARD-REFERENCE",
                                "Stages run in declaration order; inputs must come from earlier stages",
                            )
                            .with_fix_hint("Move the producing stage before the consuming stage."),
                        ));
                    }
                }
            }
        }

        Ok(Self {
            producers,
            consumers,
            stage_dependencies,
            execution_order,
        })
    }

    /// Returns the producer of an artifact.
    #[must_use]
    pub fn producer_of(&self, artifact: &str) -> Option<&ActionRef> {
        self.producers.get(artifact)
    }

    /// Returns every consumer of an artifact.
    #[must_use]
    pub fn consumers_of(&self, artifact: &str) -> &[ActionRef] {
        self.consumers.get(artifact).map_or(&[], Vec::as_slice)
    }

    /// Returns the stages a stage depends on.
    #[must_use]
    pub fn dependencies_of(&self, stage: &str) -> &[String] {
        self.stage_dependencies.get(stage).map_or(&[], Vec::as_slice)
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Artifacts that are produced but never consumed, sorted by name.
    #[must_use]
    pub fn terminal_artifacts(&self) -> Vec<&str> {
        self.producers
            .keys()
            .filter(|name| !self.consumers.contains_key(*name))
            .map(String::as_str)
            .collect()
    }
}
