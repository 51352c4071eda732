//! Action kinds and specifications.

use super::{Artifact, ArtifactPath};
use crate::buildspec::BuildProject;
use crate::errors::{ContractErrorInfo, TopologyValidationError};
use crate::utils::{is_valid_artifact_name, is_valid_resource_name};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Highest run order the managed service accepts.
pub const MAX_RUN_ORDER: u32 = 999;

/// Manual approvals expire after seven days unless configured otherwise.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The category an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionCategory {
    /// Fetches source code.
    Source,
    /// Runs a build project.
    Build,
    /// Waits for a human decision.
    Approval,
    /// Creates or executes a deployment.
    Deploy,
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "Source"),
            Self::Build => write!(f, "Build"),
            Self::Approval => write!(f, "Approval"),
            Self::Deploy => write!(f, "Deploy"),
        }
    }
}

/// Where source code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceProvider {
    /// A repository created alongside the pipeline.
    CodeCommit {
        /// The repository name.
        repository_name: String,
    },
    /// A GitHub repository, authenticated with a token kept in a secret store.
    #[serde(rename = "github")]
    GitHub {
        /// The repository owner.
        owner: String,
        /// The repository name.
        repo: String,
        /// Name of the secret holding the OAuth token.
        oauth_token_secret: String,
    },
}

/// How a source action notices new commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTrigger {
    /// The orchestrator polls the branch.
    #[default]
    Poll,
    /// Commits are pushed to the orchestrator by an event rule.
    Events,
    /// Runs start only when triggered by hand.
    None,
}

impl fmt::Display for SourceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Events => write!(f, "events"),
            Self::None => write!(f, "none"),
        }
    }
}

/// What an action does.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Fetch a branch from a source provider.
    Source {
        /// The provider.
        provider: SourceProvider,
        /// The branch to track.
        branch: String,
        /// How new commits start a run.
        trigger: SourceTrigger,
    },
    /// Run a build project.
    Build {
        /// The project to run.
        project: BuildProject,
    },
    /// Compute a change-set against a deployment stack.
    CreateReplaceChangeSet {
        /// The target stack.
        stack_name: String,
        /// The change-set name.
        change_set_name: String,
        /// The template to diff, inside an input artifact.
        template_path: ArtifactPath,
        /// Whether the deployment role gets administrator permissions.
        admin_permissions: bool,
    },
    /// Suspend until an operator approves or rejects.
    ManualApproval {
        /// How long the request stays open before it expires.
        timeout: Duration,
        /// Text shown to the approver.
        notes: Option<String>,
    },
    /// Execute a previously computed change-set.
    ExecuteChangeSet {
        /// The target stack.
        stack_name: String,
        /// The change-set name.
        change_set_name: String,
    },
}

impl ActionKind {
    /// Returns the category of this action.
    #[must_use]
    pub fn category(&self) -> ActionCategory {
        match self {
            Self::Source { .. } => ActionCategory::Source,
            Self::Build { .. } => ActionCategory::Build,
            Self::ManualApproval { .. } => ActionCategory::Approval,
            Self::CreateReplaceChangeSet { .. } | Self::ExecuteChangeSet { .. } => {
                ActionCategory::Deploy
            }
        }
    }

    /// Returns the provider name used by the managed service.
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Source {
                provider: SourceProvider::CodeCommit { .. },
                ..
            } => "CodeCommit",
            Self::Source {
                provider: SourceProvider::GitHub { .. },
                ..
            } => "GitHub",
            Self::Build { .. } => "CodeBuild",
            Self::ManualApproval { .. } => "Manual",
            Self::CreateReplaceChangeSet { .. } | Self::ExecuteChangeSet { .. } => "CloudFormation",
        }
    }

    /// Returns the action owner used by the managed service.
    #[must_use]
    pub fn owner(&self) -> &'static str {
        match self {
            Self::Source {
                provider: SourceProvider::GitHub { .. },
                ..
            } => "ThirdParty",
            _ => "AWS",
        }
    }
}

/// A single action within a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    /// The action name, unique within its stage.
    pub name: String,
    /// What the action does.
    pub kind: ActionKind,
    /// Position within the stage; equal values run in parallel.
    pub run_order: u32,
    /// Artifacts consumed.
    pub inputs: Vec<Artifact>,
    /// Artifacts produced.
    pub outputs: Vec<Artifact>,
}

impl ActionSpec {
    fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            run_order: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// A source action writing the fetched branch to `output`.
    #[must_use]
    pub fn source(
        name: impl Into<String>,
        provider: SourceProvider,
        branch: impl Into<String>,
        trigger: SourceTrigger,
        output: &Artifact,
    ) -> Self {
        let mut spec = Self::new(
            name,
            ActionKind::Source {
                provider,
                branch: branch.into(),
                trigger,
            },
        );
        spec.outputs.push(output.clone());
        spec
    }

    /// A build action reading `input` and writing `outputs`.
    #[must_use]
    pub fn build(
        name: impl Into<String>,
        project: BuildProject,
        input: &Artifact,
        outputs: &[Artifact],
    ) -> Self {
        let mut spec = Self::new(name, ActionKind::Build { project });
        spec.inputs.push(input.clone());
        spec.outputs.extend(outputs.iter().cloned());
        spec
    }

    /// A change-set creation action; the template's artifact becomes an input.
    #[must_use]
    pub fn create_replace_change_set(
        name: impl Into<String>,
        stack_name: impl Into<String>,
        change_set_name: impl Into<String>,
        template_path: ArtifactPath,
        admin_permissions: bool,
    ) -> Self {
        let input = template_path.artifact.clone();
        let mut spec = Self::new(
            name,
            ActionKind::CreateReplaceChangeSet {
                stack_name: stack_name.into(),
                change_set_name: change_set_name.into(),
                template_path,
                admin_permissions,
            },
        );
        spec.inputs.push(input);
        spec
    }

    /// A manual approval gate.
    #[must_use]
    pub fn manual_approval(name: impl Into<String>, timeout: Duration) -> Self {
        Self::new(name, ActionKind::ManualApproval { timeout, notes: None })
    }

    /// A change-set execution action.
    #[must_use]
    pub fn execute_change_set(
        name: impl Into<String>,
        stack_name: impl Into<String>,
        change_set_name: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ActionKind::ExecuteChangeSet {
                stack_name: stack_name.into(),
                change_set_name: change_set_name.into(),
            },
        )
    }

    /// Sets the run order.
    #[must_use]
    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    /// Sets the approval notes. Ignored for other kinds.
    #[must_use]
    pub fn with_notes(mut self, text: impl Into<String>) -> Self {
        if let ActionKind::ManualApproval { notes, .. } = &mut self.kind {
            *notes = Some(text.into());
        }
        self
    }

    /// Returns the action category.
    #[must_use]
    pub fn category(&self) -> ActionCategory {
        self.kind.category()
    }

    /// Returns true if this is a manual approval gate.
    #[must_use]
    pub fn is_approval(&self) -> bool {
        self.category() == ActionCategory::Approval
    }

    /// Validates the action in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, run orders out of range, approvals
    /// carrying artifacts, or a change-set whose template artifact is not an input.
    pub fn validate(&self, stage: &str) -> Result<(), TopologyValidationError> {
        let fail = |code: &str, message: String| {
            TopologyValidationError::new(message.clone())
                .with_stages(vec![stage.to_string()])
                .with_error_info(
                    ContractErrorInfo::new(code, message)
                        .with_context_entry("action", self.name.clone()),
                )
        };

        if !is_valid_resource_name(&self.name) {
            return Err(fail(
                "TOPOLOGY-INVALID-NAME",
                format!("Action name '{}' in stage '{}' is not valid", self.name, stage),
            ));
        }

        if self.run_order == 0 || self.run_order > MAX_RUN_ORDER {
            return Err(fail(
                "TOPOLOGY-RUN-ORDER",
                format!(
                    "Action '{}' has run order {}; expected 1..={}",
                    self.name, self.run_order, MAX_RUN_ORDER
                ),
            ));
        }

        for artifact in self.inputs.iter().chain(&self.outputs) {
            if !is_valid_artifact_name(artifact.name()) {
                return Err(fail(
                    "TOPOLOGY-INVALID-NAME",
                    format!("Artifact name '{}' on action '{}' is not valid", artifact, self.name),
                ));
            }
        }

        match &self.kind {
            ActionKind::ManualApproval { .. }
                if !self.inputs.is_empty() || !self.outputs.is_empty() =>
            {
                Err(fail(
                    "TOPOLOGY-APPROVAL-ARTIFACTS",
                    format!("Approval action '{}' cannot consume or produce artifacts", self.name),
                ))
            }
            ActionKind::CreateReplaceChangeSet { template_path, .. }
                if !self.inputs.contains(&template_path.artifact) =>
            {
                Err(fail(
                    "TOPOLOGY-TEMPLATE-INPUT",
                    format!(
                        "Action '{}' reads {} but does not declare '{}' as an input",
                        self.name, template_path, template_path.artifact
                    ),
                ))
            }
            ActionKind::Build { project } => project
                .validate()
                .map_err(|e| e.with_stages(vec![stage.to_string()])),
            _ => Ok(()),
        }
    }
}
