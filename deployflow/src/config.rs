//! Configuration for the deployment pipeline.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the stock source → build → deploy pipeline.

use crate::buildspec::{
    BuildEnvironment, BuildProject, BuildSpec, ComputeType, BUILD_TIMEOUT_RANGE_MINUTES, STANDARD_6_0,
};
use crate::core::{SourceProvider, SourceTrigger};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Id of the stack the pipeline is synthesized into.
    #[serde(default = "default_stack_id")]
    pub stack_id: String,
    /// Name of the pipeline resource.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Source stage settings.
    #[serde(default)]
    pub source: SourceConfig,
    /// Build stage settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Deploy stage settings.
    #[serde(default)]
    pub deploy: DeployConfig,
}

fn default_stack_id() -> String {
    "codepipeline-cdk-sample".to_string()
}

fn default_pipeline_name() -> String {
    "sample_pipeline".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stack_id: default_stack_id(),
            pipeline_name: default_pipeline_name(),
            source: SourceConfig::default(),
            build: BuildConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), stack_id = %config.stack_id, "Loaded pipeline config");
        Ok(config)
    }

    /// Sets the tracked branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.source.branch = branch.into();
        self
    }

    /// Sets the source provider.
    #[must_use]
    pub fn with_source_provider(mut self, provider: SourceProvider) -> Self {
        self.source.provider = provider;
        self
    }

    /// Sets the source trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: SourceTrigger) -> Self {
        self.source.trigger = trigger;
        self
    }

    /// Sets the approval timeout in minutes.
    #[must_use]
    pub fn with_approval_timeout_minutes(mut self, minutes: u64) -> Self {
        self.deploy.approval_timeout_minutes = minutes;
        self
    }

    /// Validates field values.
    ///
    /// # Errors
    ///
    /// Returns the first field holding an unusable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_blank("stack_id", &self.stack_id)?;
        non_blank("pipeline_name", &self.pipeline_name)?;
        non_blank("source.branch", &self.source.branch)?;
        match &self.source.provider {
            SourceProvider::CodeCommit { repository_name } => {
                non_blank("source.provider.repository_name", repository_name)?;
            }
            SourceProvider::GitHub {
                owner,
                repo,
                oauth_token_secret,
            } => {
                non_blank("source.provider.owner", owner)?;
                non_blank("source.provider.repo", repo)?;
                non_blank("source.provider.oauth_token_secret", oauth_token_secret)?;
            }
        }
        non_blank("build.project_name", &self.build.project_name)?;
        non_blank("build.image", &self.build.image)?;
        non_blank("build.base_directory", &self.build.base_directory)?;
        non_blank("build.files", &self.build.files)?;
        let (min, max) = BUILD_TIMEOUT_RANGE_MINUTES;
        if !(min..=max).contains(&self.build.timeout_minutes) {
            return Err(ConfigError::InvalidField {
                field: "build.timeout_minutes",
                reason: format!("must be between {min} and {max}"),
            });
        }
        non_blank("deploy.stack_name", &self.deploy.stack_name)?;
        non_blank("deploy.change_set_name", &self.deploy.change_set_name)?;
        non_blank("deploy.template_file", &self.deploy.template_file)?;
        if !(1..=MAX_APPROVAL_TIMEOUT_MINUTES).contains(&self.deploy.approval_timeout_minutes) {
            return Err(ConfigError::InvalidField {
                field: "deploy.approval_timeout_minutes",
                reason: format!("must be between 1 and {MAX_APPROVAL_TIMEOUT_MINUTES}"),
            });
        }
        Ok(())
    }
}

fn non_blank(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Longest approval window the managed service keeps a request open.
pub const MAX_APPROVAL_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// Source stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Where the code lives.
    #[serde(default = "default_provider")]
    pub provider: SourceProvider,
    /// Branch that starts runs.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Poll or push-event triggering.
    #[serde(default)]
    pub trigger: SourceTrigger,
}

fn default_provider() -> SourceProvider {
    SourceProvider::CodeCommit {
        repository_name: "kotasuzuki-test".to_string(),
    }
}

fn default_branch() -> String {
    "master".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            branch: default_branch(),
            trigger: SourceTrigger::default(),
        }
    }
}

/// Build stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build project name.
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Build timeout in minutes.
    #[serde(default = "default_build_timeout")]
    pub timeout_minutes: u64,
    /// Container size.
    #[serde(default)]
    pub compute_type: ComputeType,
    /// Container image.
    #[serde(default = "default_image")]
    pub image: String,
    /// Whether the container runs privileged.
    #[serde(default = "default_true")]
    pub privileged: bool,
    /// Directory packaged as the build output.
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    /// File glob inside `base_directory`.
    #[serde(default = "default_files")]
    pub files: String,
}

fn default_project_name() -> String {
    "sample_build_project".to_string()
}

fn default_build_timeout() -> u64 {
    10
}

fn default_image() -> String {
    STANDARD_6_0.to_string()
}

fn default_true() -> bool {
    true
}

fn default_base_directory() -> String {
    "cdk.out".to_string()
}

fn default_files() -> String {
    "**/*".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            timeout_minutes: default_build_timeout(),
            compute_type: ComputeType::default(),
            image: default_image(),
            privileged: default_true(),
            base_directory: default_base_directory(),
            files: default_files(),
        }
    }
}

impl BuildConfig {
    /// Builds the project these settings describe.
    #[must_use]
    pub fn to_project(&self) -> BuildProject {
        BuildProject::new(
            self.project_name.clone(),
            BuildSpec::synth(self.base_directory.clone(), self.files.clone()),
        )
        .with_environment(BuildEnvironment {
            image: self.image.clone(),
            compute_type: self.compute_type,
            privileged: self.privileged,
        })
        .with_timeout(from_minutes(self.timeout_minutes))
    }
}

/// Deploy stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Stack the change-set targets.
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    /// Change-set name.
    #[serde(default = "default_change_set_name")]
    pub change_set_name: String,
    /// Template file inside the build output.
    #[serde(default = "default_template_file")]
    pub template_file: String,
    /// Whether the deployment role gets administrator permissions.
    #[serde(default = "default_true")]
    pub admin_permissions: bool,
    /// Minutes before an unanswered approval expires.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_minutes: u64,
}

fn default_stack_name() -> String {
    "TestApiStack".to_string()
}

fn default_change_set_name() -> String {
    "TestApiStackChangeSet".to_string()
}

fn default_template_file() -> String {
    "hoge.template.json".to_string()
}

fn default_approval_timeout() -> u64 {
    MAX_APPROVAL_TIMEOUT_MINUTES
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            change_set_name: default_change_set_name(),
            template_file: default_template_file(),
            admin_permissions: default_true(),
            approval_timeout_minutes: default_approval_timeout(),
        }
    }
}

impl DeployConfig {
    /// Approval timeout as a duration.
    #[must_use]
    pub fn approval_timeout(&self) -> Duration {
        from_minutes(self.approval_timeout_minutes)
    }
}

fn from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.stack_id, "codepipeline-cdk-sample");
        assert_eq!(config.source.branch, "master");
        assert_eq!(config.build.timeout_minutes, 10);
        assert_eq!(config.deploy.stack_name, "TestApiStack");
        assert_eq!(config.deploy.change_set_name, "TestApiStackChangeSet");
        assert_eq!(config.deploy.approval_timeout(), Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_partial_override() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"source": {"branch": "main", "trigger": "events"}, "build": {"timeout_minutes": 30}}"#,
        )
        .unwrap();

        assert_eq!(config.source.branch, "main");
        assert_eq!(config.source.trigger, SourceTrigger::Events);
        assert_eq!(config.build.timeout_minutes, 30);
        assert_eq!(config.build.project_name, "sample_build_project");
    }

    #[test]
    fn test_github_provider() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"source": {"provider": {"type": "github", "owner": "awslabs", "repo": "aws-cdk-repo", "oauth_token_secret": "my-github-token"}}}"#,
        )
        .unwrap();

        assert!(matches!(config.source.provider, SourceProvider::GitHub { ref owner, .. } if owner == "awslabs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_branch() {
        let config = PipelineConfig::new().with_branch("  ");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "source.branch", .. }));
    }

    #[test]
    fn test_validate_approval_window() {
        assert!(PipelineConfig::new().with_approval_timeout_minutes(0).validate().is_err());
        assert!(PipelineConfig::new()
            .with_approval_timeout_minutes(MAX_APPROVAL_TIMEOUT_MINUTES + 1)
            .validate()
            .is_err());
        assert!(PipelineConfig::new().with_approval_timeout_minutes(60).validate().is_ok());
    }

    #[test]
    fn test_validate_build_timeout_range() {
        let mut config = PipelineConfig::new();
        config.build.timeout_minutes = 4;
        assert!(config.validate().is_err());
        config.build.timeout_minutes = 480;
        assert!(config.validate().is_ok());
        config.build.timeout_minutes = 481;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidField { field: "build.timeout_minutes", .. }
        ));
    }

    #[test]
    fn test_load_rejects_huge_build_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"build": {{"timeout_minutes": {}}}}}"#, u64::MAX).unwrap();

        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "build.timeout_minutes", .. }));
    }

    #[test]
    fn test_huge_timeouts_saturate() {
        let mut build = BuildConfig::default();
        build.timeout_minutes = u64::MAX;
        assert!(build.to_project().timeout_minutes() > 480);

        let deploy = PipelineConfig::new().with_approval_timeout_minutes(u64::MAX).deploy;
        assert_eq!(deploy.approval_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_build_project_from_config() {
        let project = BuildConfig::default().to_project();
        assert_eq!(project.name, "sample_build_project");
        assert_eq!(project.timeout_minutes(), 10);
        assert_eq!(project.build_spec.artifacts.base_directory, "cdk.out");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline_name": "release_pipeline"}}"#).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.pipeline_name, "release_pipeline");
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
