//! Reelsmith - a resumable media pipeline
//!
//! This library turns a video held in S3-compatible object storage into a set of derived
//! artifacts (audio, transcript, AI analysis, LinkedIn and Bluesky posts, thumbnail, short
//! clip). The object store doubles as the checkpoint: every stage whose output already
//! exists is skipped, so an interrupted job resumes where it stopped.

pub mod cli;
pub mod config;
pub mod executors;
pub mod fetch;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod storage;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use generate::{Generator, PostGenerator, ValidatedPost};
pub use pipeline::{
    BatchResult, BatchRunner, ExistenceSnapshot, PipelineOrchestrator, Stage, VideoJob,
};
pub use storage::ArtifactStore;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Invalid source file: {0}")]
    InvalidSource(String),

    #[error("Source artifact not found in store: {0}")]
    MissingSource(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("Failed to persist {stage} output to {key}")]
    Persist { stage: String, key: String },

    #[error("Stage {stage} exceeded its deadline of {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Publishing failed: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
