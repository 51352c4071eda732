//! Stage specifications.

use crate::core::{ActionCategory, ActionSpec, Artifact};
use crate::errors::{ContractErrorInfo, TopologyValidationError};
use crate::utils::is_valid_resource_name;
use std::collections::{BTreeMap, HashSet};

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The actions, in declaration order.
    pub actions: Vec<ActionSpec>,
}

impl StageSpec {
    /// Creates an empty stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Adds an action.
    #[must_use]
    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Adds several actions.
    #[must_use]
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = ActionSpec>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Looks up an action by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Groups actions by run order, ascending.
    ///
    /// Actions in the same group run concurrently; groups run one after the
    /// other. Within a group, declaration order is kept.
    #[must_use]
    pub fn run_order_groups(&self) -> Vec<(u32, Vec<&ActionSpec>)> {
        let mut groups: BTreeMap<u32, Vec<&ActionSpec>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups.into_iter().collect()
    }

    /// All artifacts consumed by this stage's actions.
    pub fn inputs(&self) -> impl Iterator<Item = &Artifact> {
        self.actions.iter().flat_map(|a| a.inputs.iter())
    }

    /// All artifacts produced by this stage's actions.
    pub fn outputs(&self) -> impl Iterator<Item = &Artifact> {
        self.actions.iter().flat_map(|a| a.outputs.iter())
    }

    /// Returns true if any action is a source action.
    #[must_use]
    pub fn has_source_actions(&self) -> bool {
        self.actions.iter().any(|a| a.category() == ActionCategory::Source)
    }

    /// Returns true if every action is a source action.
    #[must_use]
    pub fn is_source_only(&self) -> bool {
        !self.actions.is_empty() && self.actions.iter().all(|a| a.category() == ActionCategory::Source)
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the stage is empty, action
    /// names repeat, or any action is invalid.
    pub fn validate(&self) -> Result<(), TopologyValidationError> {
        if !is_valid_resource_name(&self.name) {
            return Err(TopologyValidationError::new(format!(
                "Stage name '{}' is not valid",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "TOPOLOGY-INVALID-NAME",
                "Stage names use letters, digits and . @ _ - (at most 100)",
            )));
        }

        if self.actions.is_empty() {
            return Err(TopologyValidationError::new(format!(
                "Stage '{}' has no actions",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("TOPOLOGY-EMPTY-STAGE", "Every stage needs at least one action")
                    .with_fix_hint("Add an action or remove the stage."),
            ));
        }

        let mut seen = HashSet::new();
        for action in &self.actions {
            if !seen.insert(action.name.as_str()) {
                return Err(TopologyValidationError::new(format!(
                    "Duplicate action '{}' in stage '{}'",
                    action.name, self.name
                ))
                .with_stages(vec![self.name.clone()])
                .with_error_info(ContractErrorInfo::new(
                    "TOPOLOGY-DUPLICATE-ACTION",
                    "Action names must be unique within a stage",
                )));
            }
            action.validate(&self.name)?;
        }

        Ok(())
    }
}
