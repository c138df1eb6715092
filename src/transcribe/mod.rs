use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::Client as TranscribeClient;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use uuid::Uuid;

use crate::config::TranscriptionConfig;

pub mod processor;

/// A finished transcription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    /// Language code detected or used
    pub language: String,

    /// Overall confidence score (0.0 to 1.0)
    pub confidence: Option<f64>,

    /// Segments with timestamps
    pub segments: Vec<TranscriptSegment>,
}

/// Individual transcript segment with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start_time: f64,

    /// End time in seconds
    pub end_time: f64,

    pub text: String,

    pub confidence: Option<f64>,

    pub speaker_id: Option<String>,
}

impl Transcript {
    /// Render the stored transcript artifact: a short header, then one timestamped line per
    /// segment
    pub fn render(&self, source_name: &str) -> String {
        let mut out = format!("Transcription of: {}\n", source_name);
        match self.confidence {
            Some(confidence) => out.push_str(&format!(
                "Detected language: {} (confidence: {:.2})\n",
                self.language, confidence
            )),
            None => out.push_str(&format!("Detected language: {}\n", self.language)),
        }
        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");

        for segment in &self.segments {
            out.push_str(&format!(
                "[{:.2}s -> {:.2}s] {}\n",
                segment.start_time, segment.end_time, segment.text
            ));
        }
        out
    }

    pub fn duration(&self) -> Option<f64> {
        self.segments.last().map(|s| s.end_time)
    }
}

/// Speech-to-text collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a local audio file
    async fn transcribe(&self, audio: &Path) -> Result<Transcript>;

    /// Tool name recorded in artifact metadata
    fn name(&self) -> String;
}

/// Transcriber backed by AWS Transcribe.
///
/// Audio is staged in an S3 bucket the Transcribe service can read, then removed once the
/// job finishes.
pub struct AwsTranscriber {
    config: TranscriptionConfig,
    s3_client: S3Client,
    transcribe_client: TranscribeClient,
    show_progress: bool,
}

impl AwsTranscriber {
    pub async fn new(config: TranscriptionConfig) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            s3_client: S3Client::new(&aws_config),
            transcribe_client: TranscribeClient::new(&aws_config),
            config,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn staging_key(&self, audio: &Path) -> String {
        let extension = audio.extension().and_then(|e| e.to_str()).unwrap_or("wav");
        format!(
            "{}audio_{}_{}.{}",
            self.config.s3_key_prefix.as_deref().unwrap_or(""),
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            extension
        )
    }

    async fn stage_audio(&self, audio: &Path) -> Result<String> {
        let key = self.staging_key(audio);
        tracing::info!("Staging audio at s3://{}/{}", self.config.s3_bucket, key);

        let body = aws_sdk_s3::primitives::ByteStream::from_path(audio)
            .await
            .with_context(|| format!("Failed to read {}", audio.display()))?;

        self.s3_client
            .put_object()
            .bucket(&self.config.s3_bucket)
            .key(&key)
            .body(body)
            .content_type("audio/wav")
            .send()
            .await
            .context("Failed to stage audio for transcription")?;

        Ok(key)
    }

    async fn start_job(&self, key: &str) -> Result<String> {
        use aws_sdk_transcribe::types::{Media, MediaFormat};

        let job_name = format!("reelsmith_{}", Uuid::new_v4());
        let media = Media::builder()
            .media_file_uri(format!("s3://{}/{}", self.config.s3_bucket, key))
            .build();

        let mut request = self
            .transcribe_client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .media_format(MediaFormat::Wav)
            .media(media);

        if let Some(language) = self.config.default_language.as_deref() {
            tracing::info!("Using configured language: {}", language);
            request = request.language_code(language.parse()?);
        } else {
            tracing::info!("Using automatic language detection");
            request = request.identify_language(true);
        }

        request
            .send()
            .await
            .context("Failed to start transcription job")?;

        tracing::info!("Started transcription job {}", job_name);
        Ok(job_name)
    }

    /// Deletion of a staged object, detached from `self` so it can outlive a cancelled call
    fn removal(&self, key: String) -> impl Future<Output = ()> + Send + 'static {
        let client = self.s3_client.clone();
        let bucket = self.config.s3_bucket.clone();
        async move {
            if let Err(e) = client.delete_object().bucket(&bucket).key(&key).send().await {
                tracing::warn!("Failed to remove staged audio {}: {}", key, e);
            } else {
                tracing::debug!("Removed staged audio {}", key);
            }
        }
    }
}

/// Runs a cleanup exactly once: awaited by `finish`, or spawned on the runtime if dropped first
struct StagedCleanup {
    cleanup: Option<BoxFuture<'static, ()>>,
}

impl StagedCleanup {
    fn new(cleanup: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::pin(cleanup)),
        }
    }

    async fn finish(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.await;
        }
    }
}

impl Drop for StagedCleanup {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup);
            }
            Err(_) => tracing::warn!("No runtime left to remove staged audio"),
        }
    }
}

#[async_trait]
impl Transcriber for AwsTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript> {
        if self.config.s3_bucket.is_empty() {
            anyhow::bail!("transcription.s3_bucket must be configured to transcribe audio");
        }

        let key = self.stage_audio(audio).await?;
        let cleanup = StagedCleanup::new(self.removal(key.clone()));

        let result = match self.start_job(&key).await {
            Ok(job_name) => {
                processor::JobPoller::new(self.transcribe_client.clone(), job_name)
                    .with_progress(self.show_progress)
                    .wait(self.config.max_segment_length)
                    .await
            }
            Err(e) => Err(e),
        };

        cleanup.finish().await;
        result
    }

    fn name(&self) -> String {
        "aws-transcribe".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_time: start,
            end_time: end,
            text: text.to_string(),
            confidence: None,
            speaker_id: None,
        }
    }

    #[test]
    fn test_render_layout() {
        let transcript = Transcript {
            language: "en-US".to_string(),
            confidence: Some(0.9312),
            segments: vec![segment(0.0, 3.2, "Hello there."), segment(3.5, 6.25, "Welcome back.")],
        };

        let rendered = transcript.render("abc.wav");
        let lines: Vec<_> = rendered.lines().collect();

        assert_eq!(lines[0], "Transcription of: abc.wav");
        assert_eq!(lines[1], "Detected language: en-US (confidence: 0.93)");
        assert_eq!(lines[2], "=".repeat(50));
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "[0.00s -> 3.20s] Hello there.");
        assert_eq!(lines[5], "[3.50s -> 6.25s] Welcome back.");
        assert_eq!(transcript.duration(), Some(6.25));
    }

    fn signalling_cleanup() -> (StagedCleanup, tokio::sync::oneshot::Receiver<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let cleanup = StagedCleanup::new(async move {
            let _ = tx.send(());
        });
        (cleanup, rx)
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_finished() {
        let (cleanup, mut rx) = signalling_cleanup();
        cleanup.finish().await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_call_is_cancelled() {
        let (cleanup, rx) = signalling_cleanup();
        let stuck = async move {
            let _cleanup = cleanup;
            std::future::pending::<()>().await;
        };

        assert!(tokio::time::timeout(Duration::from_millis(10), stuck).await.is_err());
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("cleanup spawned after cancellation")
            .unwrap();
    }

    #[test]
    fn test_render_without_confidence_or_segments() {
        let transcript = Transcript {
            language: "unknown".to_string(),
            ..Transcript::default()
        };
        let rendered = transcript.render("x.wav");
        assert!(rendered.contains("Detected language: unknown\n"));
        assert!(rendered.ends_with("\n\n"));
    }
}
