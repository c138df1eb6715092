//! LLM-backed text generation: analyses, LinkedIn posts and length-constrained social posts.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::Result;

pub mod ollama;
pub mod post;
pub mod prompts;
pub mod validate;

pub use ollama::OllamaGenerator;
pub use post::{PostCandidate, PostGenerator, ValidatedPost};
pub use prompts::{PromptKind, PromptTemplates};
pub use validate::{PostRules, PostValidator, ValidationMethod, Verdict};

/// Sampling options for one completion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationOptions {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }

    /// Near-deterministic, short output for structured validation replies
    pub const VALIDATION: GenerationOptions = GenerationOptions::new(0.1, 200);

    /// Slightly more creative, bounded output for LinkedIn posts
    pub const LINKEDIN: GenerationOptions = GenerationOptions::new(0.8, 1000);

    pub const SOCIAL_POST: GenerationOptions = GenerationOptions::new(0.7, 5000);
}

/// Failures a generator reports
#[derive(thiserror::Error, Debug)]
pub enum GeneratorError {
    #[error("Generator is rate limited: {0}")]
    RateLimited(String),

    #[error("Generator unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Unexpected generator response: {0}")]
    InvalidResponse(String),
}

/// A text-completion collaborator. Output is non-deterministic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Model name recorded in artifact metadata
    fn model_name(&self) -> String;
}

/// Wraps a generator so at most one completion is in flight across all jobs
pub struct SerializedGenerator {
    inner: Arc<dyn Generator>,
    lock: Mutex<()>,
}

impl SerializedGenerator {
    pub fn new(inner: Arc<dyn Generator>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Generator for SerializedGenerator {
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let _guard = self.lock.lock().await;
        self.inner.complete(prompt, options).await
    }

    fn model_name(&self) -> String {
        self.inner.model_name()
    }
}
