use anyhow::Context;
use futures_util::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::orchestrator::JobProcessor;
use super::VideoJob;
use crate::storage::ArtifactStore;
use crate::Result;

/// Order in which a playlist's entries are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingPolicy {
    /// Reverse the manifest order; manifests list newest videos first
    #[default]
    OldestFirst,
    /// Keep the manifest order
    AsListed,
}

impl OrderingPolicy {
    pub fn apply<T>(self, mut items: Vec<T>) -> Vec<T> {
        if self == OrderingPolicy::OldestFirst {
            items.reverse();
        }
        items
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingPolicy::OldestFirst => f.write_str("oldest-first"),
            OrderingPolicy::AsListed => f.write_str("as-listed"),
        }
    }
}

/// Playlist manifest as written by the downloader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub videos: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Playlist {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Failed to parse playlist manifest")
    }

    /// Read the manifest `name` from the playlist folder
    pub async fn load(store: &dyn ArtifactStore, folder: &str, name: &str) -> Result<Self> {
        let data = store
            .get(folder, name)
            .await
            .with_context(|| format!("Failed to read playlist {}", crate::storage::object_key(folder, name)))?;
        Self::from_json(&data)
    }

    /// Turn entries into batch items, ordered by `policy`
    pub fn to_items(&self, policy: OrderingPolicy, downloads_folder: &str) -> Vec<BatchItem> {
        let items = self
            .videos
            .iter()
            .enumerate()
            .map(|(position, entry)| match entry.id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => BatchItem::Job(VideoJob::from_path(
                    &crate::storage::object_key(downloads_folder, &format!("{}.mp4", id)),
                )),
                _ => BatchItem::Invalid {
                    label: entry
                        .title
                        .clone()
                        .unwrap_or_else(|| format!("entry {}", position + 1)),
                    reason: "missing video id".to_string(),
                },
            })
            .collect();

        policy.apply(items)
    }
}

/// One element of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItem {
    Job(VideoJob),
    /// An entry that cannot become a job; recorded as failed without processing
    Invalid { label: String, reason: String },
}

impl From<VideoJob> for BatchItem {
    fn from(job: VideoJob) -> Self {
        BatchItem::Job(job)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub video_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    fn success(video_id: String) -> Self {
        Self {
            video_id,
            status: JobStatus::Success,
            error: None,
        }
    }

    fn failed(video_id: String, error: String) -> Self {
        Self {
            video_id,
            status: JobStatus::Failed,
            error: Some(error),
        }
    }
}

/// Per-item outcomes of one batch run, in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == JobStatus::Success)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Applies a job processor to a sequence of jobs, isolating failures per item
pub struct BatchRunner {
    processor: Arc<dyn JobProcessor>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            processor,
            concurrency: 1,
        }
    }

    /// Number of jobs in flight at once; results keep input order either way
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn process_batch<I>(&self, items: I, force: bool) -> BatchResult
    where
        I: IntoIterator,
        I::Item: Into<BatchItem>,
    {
        let items: Vec<BatchItem> = items.into_iter().map(Into::into).collect();
        let total = items.len();
        tracing::info!("Processing batch of {} videos", total);

        let outcomes: Vec<BatchOutcome> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| self.process_item(index, total, item, force))
            .buffered(self.concurrency)
            .collect()
            .await;

        let result = BatchResult { outcomes };
        tracing::info!(
            "Batch complete: {} succeeded, {} failed",
            result.succeeded(),
            result.failed()
        );
        result
    }

    async fn process_item(&self, index: usize, total: usize, item: BatchItem, force: bool) -> BatchOutcome {
        let job = match item {
            BatchItem::Job(job) => job,
            BatchItem::Invalid { label, reason } => {
                tracing::warn!("[{}/{}] Skipping {}: {}", index + 1, total, label, reason);
                return BatchOutcome::failed(label, reason);
            }
        };

        tracing::info!(video_id = %job.video_id, "[{}/{}] Processing {}", index + 1, total, job);

        let run = AssertUnwindSafe(self.processor.process(&job, force)).catch_unwind();
        match run.await {
            Ok(Ok(_)) => BatchOutcome::success(job.video_id),
            Ok(Err(e)) => {
                tracing::error!(video_id = %job.video_id, "Failed: {:#}", e);
                BatchOutcome::failed(job.video_id, format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                tracing::error!(video_id = %job.video_id, "Panicked: {}", message);
                BatchOutcome::failed(job.video_id, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JobReport;
    use crate::storage::MemoryArtifactStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails the listed ids with a transcript error, panics on "boom"
    struct ScriptedProcessor {
        failing: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedProcessor {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobProcessor for ScriptedProcessor {
        async fn process(&self, job: &VideoJob, _force: bool) -> Result<JobReport> {
            self.seen.lock().unwrap().push(job.video_id.clone());
            if job.video_id == "boom" {
                panic!("boom exploded");
            }
            if self.failing.contains(&job.video_id.as_str()) {
                anyhow::bail!("transcript error");
            }
            Ok(JobReport {
                video_id: job.video_id.clone(),
                ..JobReport::default()
            })
        }
    }

    fn jobs(ids: &[&str]) -> Vec<VideoJob> {
        ids.iter()
            .map(|id| VideoJob::from_path(&format!("downloads/{}.mp4", id)))
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_job() {
        let processor = Arc::new(ScriptedProcessor::new(vec!["B"]));
        let runner = BatchRunner::new(processor.clone());

        let result = runner.process_batch(jobs(&["A", "B", "C"]), false).await;

        assert_eq!(
            result.outcomes,
            vec![
                BatchOutcome::success("A".to_string()),
                BatchOutcome::failed("B".to_string(), "transcript error".to_string()),
                BatchOutcome::success("C".to_string()),
            ]
        );
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.failed(), 1);
        assert!(!result.all_succeeded());
        assert_eq!(*processor.seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_abort_batch() {
        let runner = BatchRunner::new(Arc::new(ScriptedProcessor::new(vec![])));

        let result = runner.process_batch(jobs(&["A", "boom", "C"]), false).await;

        assert_eq!(result.outcomes[1].status, JobStatus::Failed);
        assert_eq!(result.outcomes[1].error.as_deref(), Some("boom exploded"));
        assert_eq!(result.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_batch_keeps_input_order() {
        let runner = BatchRunner::new(Arc::new(ScriptedProcessor::new(vec!["2"]))).with_concurrency(3);

        let result = runner.process_batch(jobs(&["1", "2", "3", "4", "5"]), false).await;

        let ids: Vec<_> = result.outcomes.iter().map(|o| o.video_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
        assert_eq!(result.failed(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds() {
        let runner = BatchRunner::new(Arc::new(ScriptedProcessor::new(vec![])));
        let result = runner.process_batch(Vec::<VideoJob>::new(), false).await;
        assert!(result.all_succeeded());
        assert!(result.outcomes.is_empty());
    }

    #[test]
    fn test_playlist_oldest_first_reverses_manifest() {
        let playlist = Playlist::from_json(
            br#"{"videos":[{"id":"new","title":"Newest"},{"title":"No id"},{"id":"old"}]}"#,
        )
        .unwrap();

        let items = playlist.to_items(OrderingPolicy::OldestFirst, "downloads");
        assert_eq!(items[0], BatchItem::Job(VideoJob::from_path("downloads/old.mp4")));
        assert_eq!(
            items[1],
            BatchItem::Invalid {
                label: "No id".to_string(),
                reason: "missing video id".to_string()
            }
        );
        assert_eq!(items[2], BatchItem::Job(VideoJob::from_path("downloads/new.mp4")));

        let listed = playlist.to_items(OrderingPolicy::AsListed, "downloads");
        assert_eq!(listed[0], BatchItem::Job(VideoJob::from_path("downloads/new.mp4")));
    }

    #[tokio::test]
    async fn test_invalid_entry_recorded_as_failed() {
        let processor = Arc::new(ScriptedProcessor::new(vec![]));
        let runner = BatchRunner::new(processor.clone());
        let playlist = Playlist::from_json(br#"{"videos":[{"id":"a"},{"id":""}]}"#).unwrap();

        let result = runner
            .process_batch(playlist.to_items(OrderingPolicy::AsListed, "downloads"), false)
            .await;

        assert_eq!(result.outcomes[1].video_id, "entry 2");
        assert_eq!(result.outcomes[1].error.as_deref(), Some("missing video id"));
        assert_eq!(processor.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_playlist_from_store() {
        let store = MemoryArtifactStore::new();
        store.insert("playlists", "talks.json", r#"{"videos":[{"id":"x1"}]}"#);

        let playlist = Playlist::load(&store, "playlists", "talks.json").await.unwrap();
        assert_eq!(playlist.videos[0].id.as_deref(), Some("x1"));
        assert!(Playlist::load(&store, "playlists", "missing.json").await.is_err());
    }

    #[test]
    fn test_ordering_policy_names() {
        assert_eq!(OrderingPolicy::OldestFirst.to_string(), "oldest-first");
        assert_eq!(serde_yaml::to_string(&OrderingPolicy::AsListed).unwrap().trim(), "as-listed");
    }
}
