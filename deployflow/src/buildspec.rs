//! Build specification and build project definitions.
//!
//! The build specification is the declarative document the external build
//! runner executes: `install`, `pre_build` and `build` phases in that order,
//! followed by the `artifacts` section naming what gets packaged.

use crate::errors::{ContractErrorInfo, TopologyValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Image used when none is configured.
pub const STANDARD_6_0: &str = "aws/codebuild/standard:6.0";

/// Shortest and longest build timeouts the build runner accepts, in minutes.
pub const BUILD_TIMEOUT_RANGE_MINUTES: (u64, u64) = (5, 480);

/// The build specification document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Document version.
    pub version: String,
    /// Ordered build phases.
    pub phases: BuildPhases,
    /// What to package as the build's output artifact.
    pub artifacts: ArtifactsSection,
}

/// The ordered phases of a build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildPhases {
    /// Toolchain installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallPhase>,
    /// Commands before the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<Phase>,
    /// The build itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Phase>,
}

/// The install phase, which can pin runtime versions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallPhase {
    /// Runtime name to version, e.g. `python` → `3.10`.
    #[serde(
        rename = "runtime-versions",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub runtime_versions: BTreeMap<String, String>,
    /// Shell commands.
    pub commands: Vec<String>,
}

/// A plain list of shell commands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Phase {
    /// Shell commands.
    pub commands: Vec<String>,
}

impl Phase {
    /// Creates a phase from commands.
    #[must_use]
    pub fn new(commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

/// The packaged output of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsSection {
    /// Directory the file glob is resolved against.
    #[serde(rename = "base-directory")]
    pub base_directory: String,
    /// File glob.
    pub files: String,
}

impl BuildSpec {
    /// The synth build: install the toolchain, activate the virtualenv and
    /// run `cdk synth`, packaging everything under `base_directory`.
    #[must_use]
    pub fn synth(base_directory: impl Into<String>, files: impl Into<String>) -> Self {
        let mut runtime_versions = BTreeMap::new();
        runtime_versions.insert("python".to_string(), "3.10".to_string());

        Self {
            version: "0.2".to_string(),
            phases: BuildPhases {
                install: Some(InstallPhase {
                    runtime_versions,
                    commands: vec![
                        "python3 -m pip install pipenv".to_string(),
                        "npm install -g aws-cdk".to_string(),
                        "pipenv install".to_string(),
                    ],
                }),
                pre_build: Some(Phase::new(["echo pre_build stage."])),
                build: Some(Phase::new([
                    "echo Launching virtual environments started..",
                    "export VENV_HOME_DIR=$(pipenv --venv)",
                    ". $VENV_HOME_DIR/bin/activate",
                    "cdk synth",
                ])),
            },
            artifacts: ArtifactsSection {
                base_directory: base_directory.into(),
                files: files.into(),
            },
        }
    }

    /// Serializes the spec compactly, keeping phase order.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Names of the phases present, in execution order.
    #[must_use]
    pub fn phase_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.phases.install.is_some() {
            names.push("install");
        }
        if self.phases.pre_build.is_some() {
            names.push("pre_build");
        }
        if self.phases.build.is_some() {
            names.push("build");
        }
        names
    }

    /// Validates the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is unknown, the build phase is
    /// missing or empty, or the artifacts section is blank.
    pub fn validate(&self) -> Result<(), TopologyValidationError> {
        if self.version != "0.2" {
            return Err(invalid(
                "BUILDSPEC-VERSION",
                format!("Unsupported build spec version '{}'", self.version),
            ));
        }
        if self.phases.build.as_ref().map_or(true, |p| p.commands.is_empty()) {
            return Err(invalid(
                "BUILDSPEC-NO-BUILD",
                "Build spec has no build commands".to_string(),
            ));
        }
        if self.artifacts.base_directory.trim().is_empty() || self.artifacts.files.trim().is_empty() {
            return Err(invalid(
                "BUILDSPEC-ARTIFACTS",
                "Build spec artifacts need a base directory and a file glob".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(code: &str, message: String) -> TopologyValidationError {
    TopologyValidationError::new(message.clone()).with_error_info(ContractErrorInfo::new(code, message))
}

/// Size of the build container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ComputeType {
    /// 2 vCPU, 3 GB.
    #[default]
    #[serde(rename = "BUILD_GENERAL1_SMALL")]
    Small,
    /// 4 vCPU, 7 GB.
    #[serde(rename = "BUILD_GENERAL1_MEDIUM")]
    Medium,
    /// 8 vCPU, 15 GB.
    #[serde(rename = "BUILD_GENERAL1_LARGE")]
    Large,
}

impl fmt::Display for ComputeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => write!(f, "BUILD_GENERAL1_SMALL"),
            Self::Medium => write!(f, "BUILD_GENERAL1_MEDIUM"),
            Self::Large => write!(f, "BUILD_GENERAL1_LARGE"),
        }
    }
}

/// The build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    /// Container image.
    pub image: String,
    /// Container size.
    pub compute_type: ComputeType,
    /// Whether the container runs privileged (needed for Docker builds).
    pub privileged: bool,
}

impl Default for BuildEnvironment {
    fn default() -> Self {
        Self {
            image: STANDARD_6_0.to_string(),
            compute_type: ComputeType::Small,
            privileged: true,
        }
    }
}

/// A build project: a build spec bound to an environment and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProject {
    /// Project name.
    pub name: String,
    /// The spec to run.
    pub build_spec: BuildSpec,
    /// The container.
    pub environment: BuildEnvironment,
    /// Hard limit on build duration.
    pub timeout: Duration,
}

impl BuildProject {
    /// Creates a project with the default environment and a 10 minute timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, build_spec: BuildSpec) -> Self {
        Self {
            name: name.into(),
            build_spec,
            environment: BuildEnvironment::default(),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: BuildEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout rounded up to whole minutes, as the build runner expects.
    #[must_use]
    pub fn timeout_minutes(&self) -> u64 {
        self.timeout.as_secs().div_ceil(60)
    }

    /// Validates the project and its spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid, the image is blank, or the
    /// timeout is out of the runner's range.
    pub fn validate(&self) -> Result<(), TopologyValidationError> {
        self.build_spec.validate()?;
        if self.environment.image.trim().is_empty() {
            return Err(invalid(
                "BUILDSPEC-IMAGE",
                format!("Build project '{}' has no image", self.name),
            ));
        }
        let (min, max) = BUILD_TIMEOUT_RANGE_MINUTES;
        let minutes = self.timeout_minutes();
        if !(min..=max).contains(&minutes) {
            return Err(invalid(
                "BUILDSPEC-TIMEOUT",
                format!(
                    "Build project '{}' timeout of {minutes} minutes is outside {min}..={max}",
                    self.name
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_phase_order_preserved() {
        let spec = BuildSpec::synth("cdk.out", "**/*");
        assert_eq!(spec.phase_names(), vec!["install", "pre_build", "build"]);

        let json = spec.to_json_string().unwrap();
        let install = json.find("\"install\"").unwrap();
        let pre_build = json.find("\"pre_build\"").unwrap();
        let build = json.find("\"build\"").unwrap();
        let artifacts = json.find("\"artifacts\"").unwrap();
        assert!(install < pre_build && pre_build < build && build < artifacts);
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(BuildSpec::synth("cdk.out", "**/*")).unwrap();
        assert_eq!(value["version"], "0.2");
        assert_eq!(value["phases"]["install"]["runtime-versions"]["python"], "3.10");
        assert_eq!(value["artifacts"]["base-directory"], "cdk.out");
        assert_eq!(value["artifacts"]["files"], "**/*");
        assert_eq!(
            value["phases"]["build"]["commands"][3],
            serde_json::json!("cdk synth")
        );
    }

    #[test]
    fn test_validate_rejects_empty_build() {
        let mut spec = BuildSpec::synth("cdk.out", "**/*");
        spec.phases.build = Some(Phase::default());
        assert_eq!(
            spec.validate().unwrap_err().code(),
            Some("BUILDSPEC-NO-BUILD")
        );
    }

    #[test]
    fn test_project_defaults() {
        let project = BuildProject::new("sample_build_project", BuildSpec::synth("cdk.out", "**/*"));
        assert_eq!(project.timeout_minutes(), 10);
        assert_eq!(project.environment.image, STANDARD_6_0);
        assert_eq!(project.environment.compute_type.to_string(), "BUILD_GENERAL1_SMALL");
        assert!(project.environment.privileged);
        assert!(project.validate().is_ok());
    }

    #[test]
    fn test_project_timeout_range() {
        let project = BuildProject::new("p", BuildSpec::synth("cdk.out", "**/*"))
            .with_timeout(Duration::from_secs(60));
        assert_eq!(project.validate().unwrap_err().code(), Some("BUILDSPEC-TIMEOUT"));

        let rounded = BuildProject::new("p", BuildSpec::synth("cdk.out", "**/*"))
            .with_timeout(Duration::from_secs(5 * 60 + 1));
        assert_eq!(rounded.timeout_minutes(), 6);
    }

    #[test]
    fn test_compute_type_serialize() {
        let json = serde_json::to_string(&ComputeType::Large).unwrap();
        assert_eq!(json, r#""BUILD_GENERAL1_LARGE""#);
    }
}
