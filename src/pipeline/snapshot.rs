use serde::Serialize;
use std::collections::BTreeMap;

use super::{Stage, VideoJob};
use crate::storage::ArtifactStore;

/// Which stage outputs already exist for a job.
///
/// Captured once per run and never re-queried, so a deletion made while the job runs goes
/// unnoticed until the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistenceSnapshot {
    present: BTreeMap<Stage, bool>,
}

impl ExistenceSnapshot {
    /// Query the store once for every stage in `stages`
    pub async fn capture(store: &dyn ArtifactStore, job: &VideoJob, stages: &[Stage]) -> Self {
        let mut present = BTreeMap::new();

        for stage in stages {
            let filename = job.stage_filename(*stage);
            let exists = store.exists(&job.folder, &filename).await;
            if exists {
                tracing::info!(stage = %stage, "✓ {} already exists", filename);
            } else {
                tracing::info!(stage = %stage, "✗ {} missing", filename);
            }
            present.insert(*stage, exists);
        }

        Self { present }
    }

    /// A snapshot claiming nothing exists, used in force mode
    pub fn all_missing(stages: &[Stage]) -> Self {
        Self {
            present: stages.iter().map(|stage| (*stage, false)).collect(),
        }
    }

    /// Stages not covered by the snapshot read as unsatisfied
    pub fn is_satisfied(&self, stage: Stage) -> bool {
        self.present.get(&stage).copied().unwrap_or(false)
    }

    pub fn all_satisfied(&self) -> bool {
        self.present.values().all(|exists| *exists)
    }

    pub fn missing(&self) -> Vec<Stage> {
        self.present
            .iter()
            .filter(|(_, exists)| !**exists)
            .map(|(stage, _)| *stage)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (Stage, bool)> + '_ {
        self.present.iter().map(|(stage, exists)| (*stage, *exists))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryArtifactStore;

    #[tokio::test]
    async fn test_capture_reflects_store() {
        let store = MemoryArtifactStore::new();
        let job = VideoJob::from_path("downloads/abc.mp4");
        store.insert("downloads", "abc.wav", "x");

        let stages = [Stage::Audio, Stage::Transcript];
        let snapshot = ExistenceSnapshot::capture(&store, &job, &stages).await;

        assert!(snapshot.is_satisfied(Stage::Audio));
        assert!(!snapshot.is_satisfied(Stage::Transcript));
        assert!(!snapshot.all_satisfied());
        assert_eq!(snapshot.missing(), vec![Stage::Transcript]);
        assert_eq!(store.exists_calls(), 2);
    }

    #[test]
    fn test_all_missing_never_satisfied() {
        let snapshot = ExistenceSnapshot::all_missing(&Stage::ALL);
        assert!(Stage::ALL.iter().all(|s| !snapshot.is_satisfied(*s)));
        assert_eq!(snapshot.missing().len(), Stage::ALL.len());
    }

    #[test]
    fn test_unknown_stage_reads_unsatisfied() {
        let snapshot = ExistenceSnapshot::all_missing(&[]);
        assert!(snapshot.all_satisfied());
        assert!(!snapshot.is_satisfied(Stage::Audio));
    }
}
