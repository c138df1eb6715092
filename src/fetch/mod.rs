//! Source acquisition: downloading videos and their raw metadata.

use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;

use crate::pipeline::{Stage, VideoJob};
use crate::storage::{ArtifactStore, ObjectMetadata};
use crate::Result;

pub mod ytdlp;

pub use ytdlp::YtDlpFetcher;

/// Why a fetch failed, as far as the caller needs to know
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Video {0} is unavailable")]
    NotFound(String),

    #[error("Network error while fetching {video_id}: {message}")]
    Network { video_id: String, message: String },

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },
}

impl FetchError {
    /// Whether retrying later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }
}

/// Retrieves source videos and their platform metadata
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Raw metadata document for a video, as JSON bytes
    async fn metadata(&self, video_id: &str) -> Result<Vec<u8>>;

    /// Download the video as mp4 to `target`
    async fn download(&self, video_id: &str, target: &Path) -> Result<()>;

    fn name(&self) -> String;
}

/// Download a video plus its metadata and store both under `folder`.
///
/// Returns the job for the stored video, ready to be processed.
pub async fn fetch_into_store(
    fetcher: &dyn SourceFetcher,
    store: &dyn ArtifactStore,
    folder: &str,
    video_id: &str,
    extension: &str,
) -> Result<VideoJob> {
    let job = VideoJob::from_path(&crate::storage::object_key(
        folder,
        &format!("{}.{}", video_id, extension),
    ));

    let workdir = tempfile::Builder::new()
        .prefix("reelsmith-fetch-")
        .tempdir()
        .context("Failed to create working directory")?;

    let video_path = workdir.path().join(&job.source_file);
    tracing::info!(video_id, "Downloading video with {}", fetcher.name());
    fetcher.download(video_id, &video_path).await?;

    let metadata = fetcher.metadata(video_id).await?;
    let metadata_name = job.stage_filename(Stage::RawMetadata);

    let video_meta = ObjectMetadata::new("video/mp4")
        .with("video_id", video_id)
        .with("source_tool", fetcher.name());
    if !store.put_file(&job.folder, &job.source_file, &video_path, &video_meta).await {
        return Err(crate::PipelineError::Persist {
            stage: "source".to_string(),
            key: job.source_path(),
        }
        .into());
    }

    let json_meta = ObjectMetadata::new(Stage::RawMetadata.content_type())
        .with("source_tool", fetcher.name());
    if !store.put(&job.folder, &metadata_name, metadata, &json_meta).await {
        return Err(crate::PipelineError::Persist {
            stage: Stage::RawMetadata.to_string(),
            key: crate::storage::object_key(&job.folder, &metadata_name),
        }
        .into());
    }

    tracing::info!(video_id, "Stored {} and {}", job.source_path(), metadata_name);
    Ok(job)
}
