//! The record of one pipeline run.

use super::CommitEvent;
use crate::core::{ActionCategory, ActionStatus, ArtifactRevision, RejectionReason, RunState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage completed.
    Succeeded,
    /// An action failed; later groups and stages were not scheduled.
    Failed {
        /// The stage.
        stage: String,
        /// The failing action.
        action: String,
        /// The failure message.
        reason: String,
    },
    /// An approval was rejected or expired; later groups and stages were not
    /// scheduled.
    Rejected {
        /// The stage.
        stage: String,
        /// The approval action.
        action: String,
        /// Rejected by an operator or expired.
        reason: RejectionReason,
    },
}

impl RunOutcome {
    /// The terminal run state matching this outcome.
    #[must_use]
    pub fn to_state(&self) -> RunState {
        match self {
            Self::Succeeded => RunState::Succeeded,
            Self::Failed {
                stage,
                action,
                reason,
            } => RunState::Failed {
                stage: stage.clone(),
                action: action.clone(),
                reason: reason.clone(),
            },
            Self::Rejected {
                stage,
                action,
                reason,
            } => RunState::Rejected {
                stage: stage.clone(),
                action: action.clone(),
                reason: *reason,
            },
        }
    }
}

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// The stage.
    pub stage: String,
    /// The action.
    pub action: String,
    /// The action's category.
    pub category: ActionCategory,
    /// The action's run order.
    pub run_order: u32,
    /// Final status; `Skipped` means never scheduled.
    pub status: ActionStatus,
    /// Failure or rejection message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Log text reported by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Artifacts written by the action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// When the action was scheduled (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the action finished (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl ActionRecord {
    /// Returns true if the action was ever scheduled.
    #[must_use]
    pub fn was_scheduled(&self) -> bool {
        !matches!(self.status, ActionStatus::Pending | ActionStatus::Skipped)
    }
}

/// The full record of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of the run.
    pub execution_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// The commit that started the run.
    pub commit: CommitEvent,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Every state the run visited, ending with a terminal state.
    pub states: Vec<RunState>,
    /// One record per action, in declaration order.
    pub actions: Vec<ActionRecord>,
    /// Artifact revisions produced during the run.
    pub artifacts: Vec<ArtifactRevision>,
    /// When the run started (ISO 8601).
    pub started_at: String,
    /// When the run ended (ISO 8601).
    pub finished_at: String,
}

impl RunReport {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Looks up the record of an action.
    #[must_use]
    pub fn action(&self, stage: &str, action: &str) -> Option<&ActionRecord> {
        self.actions
            .iter()
            .find(|r| r.stage == stage && r.action == action)
    }

    /// Returns the revision of an artifact produced during the run.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&ArtifactRevision> {
        self.artifacts.iter().find(|r| r.artifact == name)
    }

    /// Labels of the visited states, for logs and the CLI.
    #[must_use]
    pub fn state_labels(&self) -> Vec<String> {
        self.states.iter().map(RunState::label).collect()
    }
}
