//! Production functions for every pipeline stage.
//!
//! Each executor reads its inputs from the job's working directory, writes exactly one
//! artifact to [`StageContext::output_path`] and returns the metadata stored next to it.

use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::config::Config;
use crate::fetch::SourceFetcher;
use crate::generate::{GenerationOptions, Generator, PostGenerator, PromptTemplates};
use crate::pipeline::{ExecutorRegistry, StageContext, StageMetadata};
use crate::publish::SocialPublisher;
use crate::transcribe::Transcriber;
use crate::Result;

pub mod audio;
pub mod clip;
pub mod metadata;
pub mod social;
pub mod thumbnail;
pub mod transcript;
pub mod writing;

pub use audio::AudioExecutor;
pub use clip::ShortClipExecutor;
pub use metadata::RawMetadataExecutor;
pub use social::SocialPostExecutor;
pub use thumbnail::ThumbnailExecutor;
pub use transcript::TranscriptExecutor;
pub use writing::{Document, WritingExecutor};

/// Tool name recorded for LLM-written artifacts
pub const GENERATION_TOOL: &str = "ollama";

/// External services the executors delegate to
pub struct Collaborators {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn Generator>,
    pub templates: Arc<PromptTemplates>,
    pub posts: Arc<PostGenerator>,
    /// `None` when publishing is disabled
    pub publisher: Option<Arc<dyn SocialPublisher>>,
}

/// One executor per stage, wired to the given collaborators
pub fn build_registry(config: &Config, collaborators: Collaborators) -> ExecutorRegistry {
    let analysis_options = GenerationOptions::new(config.generation.temperature, config.generation.max_tokens);

    ExecutorRegistry::new()
        .with(Box::new(RawMetadataExecutor::new(collaborators.fetcher)))
        .with(Box::new(AudioExecutor::new(
            config.pipeline.sample_rate,
            config.pipeline.channels,
        )))
        .with(Box::new(TranscriptExecutor::new(collaborators.transcriber)))
        .with(Box::new(ThumbnailExecutor::new()))
        .with(Box::new(ShortClipExecutor::new()))
        .with(Box::new(WritingExecutor::new(
            Document::Analysis,
            collaborators.generator.clone(),
            collaborators.templates.clone(),
            analysis_options,
        )))
        .with(Box::new(WritingExecutor::new(
            Document::Linkedin,
            collaborators.generator,
            collaborators.templates,
            GenerationOptions::LINKEDIN,
        )))
        .with(Box::new(SocialPostExecutor::new(
            collaborators.posts,
            collaborators.publisher,
        )))
}

/// Run an external tool to completion, failing with its stderr
pub(crate) async fn run_tool<I, S>(program: &str, args: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run {}: {}", program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        anyhow::bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
        );
    }
    Ok(output.stdout)
}

/// Build stage metadata from key/value pairs
pub(crate) fn entries<const N: usize>(pairs: [(&str, String); N]) -> StageMetadata {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Read a required text input, rejecting empty files
pub(crate) async fn read_text_input(ctx: &StageContext<'_>, stage: crate::pipeline::Stage) -> Result<String> {
    let path = ctx.input(stage)?;
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    if text.trim().is_empty() {
        anyhow::bail!("{} is empty", ctx.job.stage_filename(stage));
    }
    Ok(text)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use testing::Workspace;

    #[tokio::test]
    async fn test_run_tool_reports_failure() {
        let err = run_tool("sh", ["-c", "echo boom >&2; exit 3"]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("sh exited with"));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_run_tool_returns_stdout() {
        let out = run_tool("sh", ["-c", "printf ok"]).await.unwrap();
        assert_eq!(out, b"ok");
    }

    #[tokio::test]
    async fn test_empty_text_input_is_rejected() {
        let workspace = Workspace::new("f/vid.mp4").with_input(Stage::Transcript, "  \n");
        let ctx = workspace.context(Stage::Analysis);
        let err = read_text_input(&ctx, Stage::Transcript).await.unwrap_err();
        assert!(err.to_string().contains("vid.txt is empty"));
    }
}
