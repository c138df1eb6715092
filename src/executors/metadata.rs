use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

use super::entries;
use crate::fetch::SourceFetcher;
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::Result;

/// Produces the raw platform metadata document when it was not stored with the video
pub struct RawMetadataExecutor {
    fetcher: Arc<dyn SourceFetcher>,
}

impl RawMetadataExecutor {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl StageExecutor for RawMetadataExecutor {
    fn stage(&self) -> Stage {
        Stage::RawMetadata
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let document = self
            .fetcher
            .metadata(&ctx.job.video_id)
            .await
            .with_context(|| format!("Failed to fetch metadata for {}", ctx.job.video_id))?;

        tokio::fs::write(ctx.output_path(), &document).await?;
        Ok(entries([("source_tool", self.fetcher.name())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::testing::Workspace;
    use std::path::Path;

    struct CannedFetcher;

    #[async_trait]
    impl SourceFetcher for CannedFetcher {
        async fn metadata(&self, video_id: &str) -> Result<Vec<u8>> {
            Ok(format!("{{\"id\":\"{}\"}}", video_id).into_bytes())
        }

        async fn download(&self, _video_id: &str, _target: &Path) -> Result<()> {
            unreachable!()
        }

        fn name(&self) -> String {
            "yt-dlp".to_string()
        }
    }

    #[tokio::test]
    async fn test_writes_fetched_document() {
        let workspace = Workspace::new("downloads/abc.mp4");
        let ctx = workspace.context(Stage::RawMetadata);

        let metadata = RawMetadataExecutor::new(Arc::new(CannedFetcher))
            .produce(&ctx)
            .await
            .unwrap();

        let written = std::fs::read_to_string(ctx.output_path()).unwrap();
        assert_eq!(written, "{\"id\":\"abc\"}");
        assert_eq!(metadata["source_tool"], "yt-dlp");
        assert!(ctx.output_path().ends_with("abc.json"));
    }
}
