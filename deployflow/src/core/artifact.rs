//! Artifact handles passed between actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named handle to a bundle of files flowing between actions.
///
/// Declaring an artifact does not produce anything; exactly one action must
/// list it as an output before any action may consume it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifact {
    name: String,
}

impl Artifact {
    /// Declares a new artifact handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Addresses a file inside this artifact.
    #[must_use]
    pub fn at_path(&self, file: impl Into<String>) -> ArtifactPath {
        ArtifactPath {
            artifact: self.clone(),
            file: file.into(),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A file inside an artifact, e.g. `output_data::hoge.template.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactPath {
    /// The artifact containing the file.
    pub artifact: Artifact,
    /// The file path relative to the artifact root.
    pub file: String,
}

impl ArtifactPath {
    /// Returns the slash-separated location, e.g. `output_data/hoge.template.json`.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}/{}", self.artifact.name(), self.file)
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.artifact.name(), self.file)
    }
}

/// A concrete revision of an artifact produced during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRevision {
    /// The artifact this revision belongs to.
    pub artifact: String,
    /// The `stage/action` that produced it.
    pub produced_by: String,
    /// Revision identifier, e.g. a commit id or build id.
    pub revision_id: String,
    /// When the revision was recorded (ISO 8601).
    pub created_at: String,
}

impl ArtifactRevision {
    /// Creates a new revision record.
    #[must_use]
    pub fn new(
        artifact: impl Into<String>,
        produced_by: impl Into<String>,
        revision_id: impl Into<String>,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            produced_by: produced_by.into(),
            revision_id: revision_id.into(),
            created_at: crate::utils::iso_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_display() {
        let output = Artifact::new("output_data");
        let path = output.at_path("hoge.template.json");

        assert_eq!(path.to_string(), "output_data::hoge.template.json");
        assert_eq!(path.location(), "output_data/hoge.template.json");
        assert_eq!(path.artifact, output);
    }

    #[test]
    fn test_artifact_serializes_as_name() {
        let json = serde_json::to_string(&Artifact::new("source_output")).unwrap();
        assert_eq!(json, r#""source_output""#);
    }

    #[test]
    fn test_revision_records_producer() {
        let rev = ArtifactRevision::new("source_output", "Source/CodeCommit_Source", "C1");
        assert_eq!(rev.produced_by, "Source/CodeCommit_Source");
        assert!(rev.created_at.contains('T'));
    }
}
