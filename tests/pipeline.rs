use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reelsmith::pipeline::{
    BatchRunner, ExecutorRegistry, JobProcessor, JobStatus, OrderingPolicy, PipelineOrchestrator, Playlist,
    StageContext, StageExecutor, StageMetadata, StagePlan,
};
use reelsmith::storage::MemoryArtifactStore;
use reelsmith::Stage;

/// Writes the stage label, counting every attempt and every stage that ran to completion
struct Touch {
    stage: Stage,
    attempts: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl StageExecutor for Touch {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> reelsmith::Result<StageMetadata> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if ctx.job.video_id == "broken" && self.stage == Stage::Transcript {
            anyhow::bail!("no speech found");
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(ctx.output_path(), self.stage.label()).await?;
        Ok(StageMetadata::new())
    }
}

fn orchestrator(
    store: Arc<MemoryArtifactStore>,
    attempts: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
) -> PipelineOrchestrator {
    let mut registry = ExecutorRegistry::new();
    for stage in Stage::ALL {
        registry.register(Box::new(Touch {
            stage,
            attempts: attempts.clone(),
            runs: runs.clone(),
        }));
    }
    PipelineOrchestrator::new(store, registry, StagePlan::all().without(Stage::ShortClip))
}

#[tokio::test]
async fn test_playlist_batch_resumes_and_isolates_failures() {
    let store = Arc::new(MemoryArtifactStore::new());
    store.insert(
        "playlists",
        "talks.json",
        r#"{"videos":[{"id":"newest"},{"id":"broken"},{"title":"untitled"},{"id":"oldest"}]}"#,
    );
    for id in ["newest", "broken", "oldest"] {
        store.insert("downloads", &format!("{}.mp4", id), "video");
    }

    let playlist = Playlist::load(store.as_ref(), "playlists", "talks.json").await.unwrap();
    let items = playlist.to_items(OrderingPolicy::OldestFirst, "downloads");

    let attempts = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let processor: Arc<dyn JobProcessor> =
        Arc::new(orchestrator(store.clone(), attempts.clone(), runs.clone()));
    let runner = BatchRunner::new(processor).with_concurrency(2);

    let first = runner.process_batch(items.clone(), false).await;
    let order: Vec<&str> = first.outcomes.iter().map(|o| o.video_id.as_str()).collect();
    assert_eq!(order, ["oldest", "untitled", "broken", "newest"]);
    assert_eq!(first.succeeded(), 2);
    assert_eq!(first.outcomes[1].status, JobStatus::Failed);
    assert_eq!(first.outcomes[2].status, JobStatus::Failed);

    assert!(store.data("downloads", "oldest-bluesky.txt").is_some());
    assert!(store.data("downloads", "newest-analysis.txt").is_some());
    assert!(store.data("downloads", "broken.txt").is_none());
    assert!(store.data("downloads", "oldest-sm.mp4").is_none());

    // Completed jobs do no work on a second pass
    attempts.store(0, Ordering::SeqCst);
    runs.store(0, Ordering::SeqCst);
    let second = runner.process_batch(items, false).await;
    assert_eq!(second.succeeded(), 2);
    assert_eq!(second.outcomes[2].status, JobStatus::Failed);

    // the broken job resumes at its transcript, which fails again before anything is stored
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(store.data("downloads", "broken.json").is_some());
    assert!(store.data("downloads", "broken.wav").is_some());
    assert!(store.data("downloads", "broken.webp").is_none());
}
