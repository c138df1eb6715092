use anyhow::{Context, Result};
use aws_sdk_transcribe::types::{TranscriptionJob, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::{Transcript, TranscriptSegment};

/// Subset of the AWS Transcribe result document we read
#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: AwsResults,
}

#[derive(Debug, Deserialize)]
struct AwsResults {
    #[serde(default)]
    items: Vec<AwsItem>,
}

#[derive(Debug, Deserialize)]
struct AwsItem {
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    alternatives: Vec<AwsAlternative>,
    speaker_label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AwsAlternative {
    confidence: Option<String>,
    content: String,
}

/// Polls a Transcribe job until it settles, then fetches and parses its result
pub struct JobPoller {
    client: TranscribeClient,
    job_name: String,
    show_progress: bool,
}

impl JobPoller {
    pub fn new(client: TranscribeClient, job_name: String) -> Self {
        Self {
            client,
            job_name,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub async fn wait(&self, max_segment_length: f64) -> Result<Transcript> {
        let progress = if self.show_progress {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                bar.set_style(style);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };

        let started = Instant::now();
        let mut checks: u64 = 0;

        let job = loop {
            checks += 1;
            let job = self.fetch_job().await?;

            match job.transcription_job_status() {
                Some(TranscriptionJobStatus::Completed) => {
                    progress.finish_with_message("Transcription completed");
                    break job;
                }
                Some(TranscriptionJobStatus::Failed) => {
                    progress.finish_with_message("Transcription failed");
                    anyhow::bail!(
                        "Transcription job failed: {}",
                        job.failure_reason().unwrap_or("unknown reason")
                    );
                }
                Some(TranscriptionJobStatus::InProgress) | Some(TranscriptionJobStatus::Queued) => {
                    progress.set_message(format!(
                        "Transcribing... ({}s elapsed, check #{})",
                        started.elapsed().as_secs(),
                        checks
                    ));
                    sleep(poll_interval(checks)).await;
                }
                other => {
                    progress.finish_and_clear();
                    anyhow::bail!("Unexpected transcription job status: {:?}", other);
                }
            }
        };

        tracing::info!(
            "Transcription job {} finished in {}s",
            self.job_name,
            started.elapsed().as_secs()
        );

        let uri = job
            .transcript()
            .and_then(|t| t.transcript_file_uri())
            .context("Transcription job has no transcript URI")?;
        let document = download(uri).await?;

        let language = job
            .language_code()
            .map(|code| code.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        parse_result(&document, language, max_segment_length)
    }

    async fn fetch_job(&self) -> Result<TranscriptionJob> {
        let response = self
            .client
            .get_transcription_job()
            .transcription_job_name(&self.job_name)
            .send()
            .await
            .context("Failed to get transcription job status")?;

        response
            .transcription_job()
            .cloned()
            .context("Transcription job not found")
    }
}

/// Backoff between status checks: 5s growing by 2s, capped at 30s
fn poll_interval(check: u64) -> Duration {
    Duration::from_secs((5 + check.saturating_sub(1) * 2).min(30))
}

async fn download(uri: &str) -> Result<String> {
    let response = reqwest::get(uri)
        .await
        .context("Failed to download transcript")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download transcript: HTTP {}", response.status());
    }

    response
        .text()
        .await
        .context("Failed to read transcript content")
}

/// Parse a Transcribe result document into timed segments
pub fn parse_result(document: &str, language: String, max_segment_length: f64) -> Result<Transcript> {
    let parsed: AwsTranscript =
        serde_json::from_str(document).context("Failed to parse transcript JSON")?;

    let mut builder = SegmentBuilder::new(max_segment_length);
    for item in &parsed.results.items {
        let Some(alternative) = item.alternatives.first() else {
            continue;
        };

        match item.item_type.as_str() {
            "pronunciation" => builder.word(Word {
                start: item.start_time.as_deref().and_then(|s| s.parse().ok()),
                end: item.end_time.as_deref().and_then(|s| s.parse().ok()),
                content: &alternative.content,
                confidence: alternative.confidence.as_deref().and_then(|c| c.parse().ok()),
                speaker: item.speaker_label.as_deref(),
            }),
            "punctuation" => builder.punctuation(&alternative.content),
            _ => {}
        }
    }

    let segments = builder.finish();
    let confidence = mean(segments.iter().filter_map(|s| s.confidence));

    Ok(Transcript {
        language,
        confidence,
        segments,
    })
}

struct Word<'a> {
    start: Option<f64>,
    end: Option<f64>,
    content: &'a str,
    confidence: Option<f64>,
    speaker: Option<&'a str>,
}

/// Groups words into segments, breaking on speaker changes, pauses over a second, the length
/// limit, or a sentence end once the segment is half the limit long
struct SegmentBuilder {
    max_length: f64,
    segments: Vec<TranscriptSegment>,
    text: String,
    start: Option<f64>,
    end: Option<f64>,
    confidences: Vec<f64>,
    speaker: Option<String>,
}

impl SegmentBuilder {
    fn new(max_length: f64) -> Self {
        Self {
            max_length,
            segments: Vec::new(),
            text: String::new(),
            start: None,
            end: None,
            confidences: Vec::new(),
            speaker: None,
        }
    }

    fn word(&mut self, word: Word<'_>) {
        if self.should_break(&word) {
            self.flush();
            self.start = word.start;
            self.speaker = word.speaker.map(str::to_string);
        } else {
            self.text.push(' ');
        }

        self.text.push_str(word.content);
        self.end = word.end.or(self.end);
        self.confidences.extend(word.confidence);
    }

    fn punctuation(&mut self, mark: &str) {
        self.text.push_str(mark);
    }

    fn should_break(&self, word: &Word<'_>) -> bool {
        if self.text.is_empty() {
            return true;
        }

        let elapsed = self.start.zip(word.start).map(|(s, w)| w - s);
        let paused = word.start.zip(self.end).map(|(w, e)| w - e > 1.0).unwrap_or(false);
        let too_long = elapsed.map(|e| e > self.max_length).unwrap_or(false);
        let sentence_end = self.text.ends_with(['.', '!', '?'])
            && elapsed.map(|e| e > self.max_length / 2.0).unwrap_or(false);

        self.speaker.as_deref() != word.speaker || paused || too_long || sentence_end
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.text);
        let confidences = std::mem::take(&mut self.confidences);

        if let (Some(start), Some(end)) = (self.start, self.end) {
            let text = text.trim();
            if !text.is_empty() {
                self.segments.push(TranscriptSegment {
                    start_time: start,
                    end_time: end,
                    text: text.to_string(),
                    confidence: mean(confidences.into_iter()),
                    speaker_id: self.speaker.clone(),
                });
            }
        }
        self.end = None;
    }

    fn finish(mut self) -> Vec<TranscriptSegment> {
        self.flush();
        self.segments
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
