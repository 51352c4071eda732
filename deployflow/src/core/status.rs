//! Action and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a single action within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not scheduled yet.
    #[default]
    Pending,
    /// Currently running.
    Running,
    /// Suspended on a manual approval.
    Waiting,
    /// Completed successfully.
    Succeeded,
    /// Failed; the run halts.
    Failed,
    /// An approval was rejected or expired.
    Rejected,
    /// Never scheduled because an earlier action ended the run.
    Skipped,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Waiting => write!(f, "waiting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl ActionStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Rejected | Self::Skipped
        )
    }
}

/// Why an approval ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// An operator rejected the request.
    Rejected,
    /// Nobody answered before the approval timeout.
    Expired,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A node of the run state machine.
///
/// `Running` and `Waiting` name the stage and the run-order group being
/// executed. `Failed` is reachable from any active node; `Rejected` only from
/// `Waiting`. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// The run has been created but nothing has started.
    Pending,
    /// A group of actions is running.
    Running {
        /// The stage.
        stage: String,
        /// The actions in the group.
        actions: Vec<String>,
    },
    /// A group containing an approval gate is suspended.
    Waiting {
        /// The stage.
        stage: String,
        /// The actions in the group.
        actions: Vec<String>,
    },
    /// Every stage completed.
    Succeeded,
    /// An action failed.
    Failed {
        /// The stage.
        stage: String,
        /// The failing action.
        action: String,
        /// The failure message.
        reason: String,
    },
    /// An approval was rejected or expired.
    Rejected {
        /// The stage.
        stage: String,
        /// The approval action.
        action: String,
        /// Rejected by an operator or expired.
        reason: RejectionReason,
    },
}

impl RunState {
    /// Returns true if the state is absorbing.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { .. } | Self::Rejected { .. }
        )
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running { .. } | Self::Waiting { .. }) => true,
            (
                Self::Running { .. } | Self::Waiting { .. },
                Self::Running { .. } | Self::Waiting { .. } | Self::Succeeded | Self::Failed { .. },
            ) => true,
            (Self::Waiting { .. }, Self::Rejected { .. }) => true,
            _ => false,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Pending => "pending".to_string(),
            Self::Running { stage, actions } => format!("{stage}:{}(running)", actions.join("+")),
            Self::Waiting { stage, actions } => format!("{stage}:{}(waiting)", actions.join("+")),
            Self::Succeeded => "succeeded".to_string(),
            Self::Failed { stage, action, .. } => format!("{stage}:{action}(failed)"),
            Self::Rejected { stage, action, reason } => format!("{stage}:{action}({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(stage: &str, action: &str) -> RunState {
        RunState::Running {
            stage: stage.to_string(),
            actions: vec![action.to_string()],
        }
    }

    fn waiting(stage: &str, action: &str) -> RunState {
        RunState::Waiting {
            stage: stage.to_string(),
            actions: vec![action.to_string()],
        }
    }

    fn rejected() -> RunState {
        RunState::Rejected {
            stage: "Deploy".to_string(),
            action: "Review".to_string(),
            reason: RejectionReason::Rejected,
        }
    }

    #[test]
    fn test_action_status_terminal() {
        assert!(ActionStatus::Succeeded.is_terminal());
        assert!(ActionStatus::Rejected.is_terminal());
        assert!(!ActionStatus::Waiting.is_terminal());
        assert!(!ActionStatus::Running.is_terminal());
    }

    #[test]
    fn test_rejection_only_from_waiting() {
        assert!(waiting("Deploy", "Review").can_transition_to(&rejected()));
        assert!(!running("Build", "build_action").can_transition_to(&rejected()));
        assert!(!RunState::Pending.can_transition_to(&rejected()));
    }

    #[test]
    fn test_failure_from_running() {
        let failed = RunState::Failed {
            stage: "Build".to_string(),
            action: "build_action".to_string(),
            reason: "exit 1".to_string(),
        };
        assert!(running("Build", "build_action").can_transition_to(&failed));
        assert!(failed.is_terminal());
        assert!(!failed.can_transition_to(&running("Build", "build_action")));
    }

    #[test]
    fn test_no_transition_out_of_success() {
        assert!(!RunState::Succeeded.can_transition_to(&running("Source", "x")));
        assert!(!RunState::Pending.can_transition_to(&RunState::Succeeded));
    }

    #[test]
    fn test_labels() {
        assert_eq!(waiting("Deploy", "Review").label(), "Deploy:Review(waiting)");
        assert_eq!(rejected().label(), "Deploy:Review(rejected)");
    }

    #[test]
    fn test_run_state_serialize() {
        let json = serde_json::to_value(running("Source", "CodeCommit_Source")).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["stage"], "Source");
    }
}
