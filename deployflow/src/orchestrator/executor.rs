//! The seam between the orchestrator and the systems that do the work.

use crate::core::{ActionCategory, ActionKind, ActionSpec, ArtifactRevision};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

/// A push to a branch of the source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEvent {
    /// The branch that moved.
    pub branch: String,
    /// The new head commit.
    pub commit_id: String,
}

impl CommitEvent {
    /// Creates a commit event.
    #[must_use]
    pub fn new(branch: impl Into<String>, commit_id: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit_id: commit_id.into(),
        }
    }
}

/// Everything an executor needs to perform one action.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    /// The run this invocation belongs to.
    pub execution_id: Uuid,
    /// The commit that started the run.
    pub commit: CommitEvent,
    /// The stage name.
    pub stage: String,
    /// The action to perform.
    pub action: ActionSpec,
    /// Resolved revisions of the action's input artifacts, in declaration order.
    pub inputs: Vec<ArtifactRevision>,
}

impl ActionInvocation {
    /// `stage/action`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.stage, self.action.name)
    }
}

/// What an executor reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action finished; `outputs` maps artifact names to revision ids.
    Succeeded {
        /// Produced artifacts.
        outputs: BTreeMap<String, String>,
    },
    /// The action failed.
    Failed {
        /// Short failure message.
        message: String,
        /// Log text captured from the external system.
        log: Option<String>,
    },
}

impl ActionOutcome {
    /// A failure without log text.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            log: None,
        }
    }
}

/// Performs source, build and deploy actions.
///
/// Approval actions never reach the executor; they go through the
/// [`super::ApprovalGate`].
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Performs the action.
    async fn execute(&self, invocation: ActionInvocation) -> ActionOutcome;
}

/// An executor that follows a script, for tests and dry runs.
///
/// By default every action succeeds and produces all of its declared
/// outputs. Source outputs get the commit id as revision; other outputs get
/// `<artifact>@<commit>`.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failures: BTreeMap<String, String>,
    delays: BTreeMap<String, Duration>,
    withheld: BTreeSet<String>,
    invoked: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Creates an executor where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `action` fail with `message`.
    #[must_use]
    pub fn with_failure(mut self, action: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(action.into(), message.into());
        self
    }

    /// Makes `action` take `delay` before reporting.
    #[must_use]
    pub fn with_delay(mut self, action: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(action.into(), delay);
        self
    }

    /// Makes `action` succeed without producing its outputs.
    #[must_use]
    pub fn withholding_outputs(mut self, action: impl Into<String>) -> Self {
        self.withheld.insert(action.into());
        self
    }

    /// Names of the invoked actions, in invocation order.
    #[must_use]
    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().clone()
    }

    fn revision_for(invocation: &ActionInvocation, artifact: &str) -> String {
        match invocation.action.kind {
            ActionKind::Source { .. } => invocation.commit.commit_id.clone(),
            _ => format!("{artifact}@{}", invocation.commit.commit_id),
        }
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: ActionInvocation) -> ActionOutcome {
        let name = invocation.action.name.clone();
        self.invoked.lock().push(name.clone());

        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }

        if let Some(message) = self.failures.get(&name) {
            let log = (invocation.action.category() == ActionCategory::Build)
                .then(|| format!("[Container] Phase BUILD failed: {message}"));
            return ActionOutcome::Failed {
                message: message.clone(),
                log,
            };
        }

        let outputs = if self.withheld.contains(&name) {
            BTreeMap::new()
        } else {
            invocation
                .action
                .outputs
                .iter()
                .map(|a| (a.name().to_string(), Self::revision_for(&invocation, a.name())))
                .collect()
        };
        ActionOutcome::Succeeded { outputs }
    }
}
