//! Per-run artifact store.

use crate::core::ArtifactRevision;
use crate::errors::DeployflowError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Artifact revisions produced during one run.
///
/// Each artifact is written at most once; a second write is rejected and the
/// first revision is kept.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    revisions: RwLock<BTreeMap<String, ArtifactRevision>>,
}

impl ArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a revision.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::ArtifactAlreadyProduced`] if the artifact
    /// already has a revision in this run.
    pub fn put(&self, revision: ArtifactRevision) -> Result<(), DeployflowError> {
        let mut revisions = self.revisions.write();
        if let Some(existing) = revisions.get(&revision.artifact) {
            return Err(DeployflowError::ArtifactAlreadyProduced {
                artifact: revision.artifact,
                producer: existing.produced_by.clone(),
            });
        }
        revisions.insert(revision.artifact.clone(), revision);
        Ok(())
    }

    /// Returns the revision of an artifact.
    #[must_use]
    pub fn get(&self, artifact: &str) -> Option<ArtifactRevision> {
        self.revisions.read().get(artifact).cloned()
    }

    /// Returns true if the artifact has a revision.
    #[must_use]
    pub fn contains(&self, artifact: &str) -> bool {
        self.revisions.read().contains_key(artifact)
    }

    /// Returns every revision, sorted by artifact name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ArtifactRevision> {
        self.revisions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let store = ArtifactStore::new();
        store
            .put(ArtifactRevision::new("source_output", "Source/CodeCommit_Source", "C1"))
            .unwrap();

        assert!(store.contains("source_output"));
        assert_eq!(store.get("source_output").unwrap().revision_id, "C1");
        assert!(store.get("output_data").is_none());
    }

    #[test]
    fn test_write_once() {
        let store = ArtifactStore::new();
        store
            .put(ArtifactRevision::new("output_data", "Build/build_action", "b1"))
            .unwrap();

        let err = store
            .put(ArtifactRevision::new("output_data", "Build/other", "b2"))
            .unwrap_err();

        assert!(matches!(
            err,
            DeployflowError::ArtifactAlreadyProduced { ref producer, .. } if producer == "Build/build_action"
        ));
        assert_eq!(store.get("output_data").unwrap().revision_id, "b1");
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = ArtifactStore::new();
        store.put(ArtifactRevision::new("b", "S/x", "1")).unwrap();
        store.put(ArtifactRevision::new("a", "S/y", "2")).unwrap();

        let names: Vec<String> = store.snapshot().into_iter().map(|r| r.artifact).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
