use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

use super::entries;
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::transcribe::Transcriber;
use crate::utils::format_duration;
use crate::Result;

/// Transcribes the extracted audio and stores the rendered transcript
pub struct TranscriptExecutor {
    transcriber: Arc<dyn Transcriber>,
}

impl TranscriptExecutor {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait]
impl StageExecutor for TranscriptExecutor {
    fn stage(&self) -> Stage {
        Stage::Transcript
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let audio = ctx.input(Stage::Audio)?;
        let audio_file = ctx.job.stage_filename(Stage::Audio);

        let transcript = self
            .transcriber
            .transcribe(audio)
            .await
            .with_context(|| format!("Transcription of {} failed", audio_file))?;

        if transcript.segments.is_empty() {
            anyhow::bail!("{} produced an empty transcript", audio_file);
        }
        tracing::info!(
            video_id = %ctx.job.video_id,
            "Transcribed {} segments covering {} ({})",
            transcript.segments.len(),
            format_duration(transcript.duration().unwrap_or_default()),
            transcript.language
        );

        tokio::fs::write(ctx.output_path(), transcript.render(&audio_file)).await?;

        Ok(entries([
            ("source_file", audio_file),
            ("original_source", ctx.source_file().to_string()),
            ("transcription_tool", self.transcriber.name()),
            ("language", transcript.language),
        ]))
    }
}
