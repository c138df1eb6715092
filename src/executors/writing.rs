use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{entries, read_text_input, GENERATION_TOOL};
use crate::generate::{GenerationOptions, Generator, PromptTemplates};
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::Result;

/// Long-form documents written from the transcript in a single completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Analysis,
    Linkedin,
}

impl Document {
    fn stage(self) -> Stage {
        match self {
            Document::Analysis => Stage::Analysis,
            Document::Linkedin => Stage::LinkedinPost,
        }
    }
}

fn analysis_report(
    video_id: &str,
    transcript_file: &str,
    model: &str,
    generated_at: DateTime<Utc>,
    content: &str,
) -> String {
    format!(
        "# Video Analysis Report\n\
         **Video ID:** {}\n\
         **Transcription File:** {}\n\
         **Analysis Generated:** {}\n\
         **Model Used:** {}\n\n---\n\n{}",
        video_id,
        transcript_file,
        generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        model,
        content
    )
}

fn linkedin_post(video_id: &str, transcript_file: &str, model: &str, content: &str) -> String {
    format!(
        "# LinkedIn Post - {}\n**Generated from:** {}\n**Model Used:** {}\n\n---\n\n{}",
        video_id, transcript_file, model, content
    )
}

/// Writes the analysis report or the LinkedIn post
pub struct WritingExecutor {
    document: Document,
    generator: Arc<dyn Generator>,
    templates: Arc<PromptTemplates>,
    options: GenerationOptions,
}

impl WritingExecutor {
    pub fn new(
        document: Document,
        generator: Arc<dyn Generator>,
        templates: Arc<PromptTemplates>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            document,
            generator,
            templates,
            options,
        }
    }
}

#[async_trait]
impl StageExecutor for WritingExecutor {
    fn stage(&self) -> Stage {
        self.document.stage()
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let transcript = read_text_input(ctx, Stage::Transcript).await?;
        let transcript_file = ctx.job.stage_filename(Stage::Transcript);
        let model = self.generator.model_name();

        let prompt = match self.document {
            Document::Analysis => self.templates.analysis(&transcript),
            Document::Linkedin => self.templates.linkedin(&transcript),
        };

        let content = self
            .generator
            .complete(&prompt, &self.options)
            .await
            .with_context(|| format!("Failed to generate {}", self.stage()))?;
        let content = content.trim();
        if content.is_empty() {
            anyhow::bail!("Generator returned an empty {}", self.stage());
        }

        let video_id = &ctx.job.video_id;
        let body = match self.document {
            Document::Analysis => analysis_report(video_id, &transcript_file, &model, Utc::now(), content),
            Document::Linkedin => linkedin_post(video_id, &transcript_file, &model, content),
        };
        tokio::fs::write(ctx.output_path(), body).await?;

        let mut metadata = entries([
            ("source_file", transcript_file),
            ("original_source", ctx.source_file().to_string()),
            ("analysis_tool", GENERATION_TOOL.to_string()),
            ("model_name", model),
        ]);
        if self.document == Document::Linkedin {
            metadata.insert("post_type".to_string(), "linkedin".to_string());
        }
        Ok(metadata)
    }
}
