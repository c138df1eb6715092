use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{entries, read_text_input, GENERATION_TOOL};
use crate::generate::PostGenerator;
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::publish::{youtube_watch_url, PostMedia, PostRequest, SocialPublisher};
use crate::utils::{is_youtube_id, truncate_with_ellipsis};
use crate::{PipelineError, Result};

/// Writes the length-constrained social post and, once it is stored, publishes it
pub struct SocialPostExecutor {
    posts: Arc<PostGenerator>,
    publisher: Option<Arc<dyn SocialPublisher>>,
}

impl SocialPostExecutor {
    pub fn new(posts: Arc<PostGenerator>, publisher: Option<Arc<dyn SocialPublisher>>) -> Self {
        Self { posts, publisher }
    }

    /// Richest media this job can offer
    fn media(ctx: &StageContext<'_>) -> PostMedia {
        let video_id = &ctx.job.video_id;
        let link = is_youtube_id(video_id).then(|| youtube_watch_url(video_id));
        let title = match link {
            Some(_) => format!("YouTube Video ({})", video_id),
            None => format!("Video: {}", ctx.job.base_name),
        };

        PostMedia::choose(
            link.as_deref(),
            ctx.optional_input(Stage::ShortClip),
            ctx.optional_input(Stage::Thumbnail),
            &title,
        )
    }
}

#[async_trait]
impl StageExecutor for SocialPostExecutor {
    fn stage(&self) -> Stage {
        Stage::SocialPost
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let transcript = read_text_input(ctx, Stage::Transcript).await?;
        let post = self
            .posts
            .generate_validated_post(&ctx.job.video_id, &transcript)
            .await?;

        if !post.accepted {
            tracing::warn!(
                video_id = %ctx.job.video_id,
                "Storing post that never passed validation after {} attempts",
                post.iterations
            );
        }
        tokio::fs::write(ctx.output_path(), &post.text).await?;

        Ok(entries([
            ("source_file", ctx.job.stage_filename(Stage::Transcript)),
            ("original_source", ctx.source_file().to_string()),
            ("analysis_tool", GENERATION_TOOL.to_string()),
            ("model_name", self.posts.model_name()),
            ("post_type", "bluesky".to_string()),
            ("accepted", post.accepted.to_string()),
            ("iterations", post.iterations.to_string()),
        ]))
    }

    async fn after_persist(&self, ctx: &StageContext<'_>, artifact: &Path) -> Result<()> {
        let Some(publisher) = &self.publisher else {
            tracing::debug!("Social publishing disabled");
            return Ok(());
        };

        let text = tokio::fs::read_to_string(artifact).await?;
        let request = PostRequest {
            text: truncate_with_ellipsis(text.trim(), publisher.text_limit()),
            media: Self::media(ctx),
        };

        if publisher.publish(&request).await {
            Ok(())
        } else {
            Err(PipelineError::Publish(format!("post for {} was not published", ctx.job.video_id)).into())
        }
    }
}
