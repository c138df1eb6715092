use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{GenerationOptions, Generator, GeneratorError};
use crate::config::GenerationConfig;
use crate::Result;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Generator backed by an Ollama server's `/api/chat` endpoint
pub struct OllamaGenerator {
    client: Client,
    chat_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = crate::utils::validate_and_normalize_url(&config.ollama_url)?;
        let client = Client::builder()
            .user_agent(concat!("reelsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        tracing::info!("Using Ollama at {} with model {}", base, config.model);

        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", base.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, options: &GenerationOptions) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: ChatOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        tracing::debug!("Sending {} byte prompt to {}", prompt.len(), self.chat_url);

        let response = self
            .client
            .post(&self.chat_url)
            .json(&self.request(prompt, options))
            .send()
            .await
            .map_err(|e| GeneratorError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        parsed
            .message
            .map(|message| message.content)
            .ok_or_else(|| GeneratorError::InvalidResponse("response has no message".to_string()).into())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

fn status_error(status: StatusCode, body: String) -> GeneratorError {
    let detail = format!("HTTP {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        GeneratorError::RateLimited(detail)
    } else if status.is_server_error() {
        GeneratorError::ServiceUnavailable(detail)
    } else {
        GeneratorError::InvalidResponse(detail)
    }
}
