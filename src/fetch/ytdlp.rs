use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{FetchError, SourceFetcher};
use crate::Result;

/// Fetcher shelling out to yt-dlp
pub struct YtDlpFetcher {
    yt_dlp_path: String,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }

    /// Accepts a bare id or any URL yt-dlp understands
    pub fn video_url(video_id: &str) -> String {
        if video_id.starts_with("http://") || video_id.starts_with("https://") {
            video_id.to_string()
        } else {
            format!("https://www.youtube.com/watch?v={}", video_id)
        }
    }

    async fn run(&self, video_id: &str, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.yt_dlp_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FetchError::Tool {
                tool: self.yt_dlp_path.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(video_id, &stderr).into());
        }

        Ok(output.stdout)
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn metadata(&self, video_id: &str) -> Result<Vec<u8>> {
        tracing::debug!("Extracting metadata for {}", video_id);
        let url = Self::video_url(video_id);

        let stdout = self
            .run(video_id, &["--dump-json", "--no-playlist", "--skip-download", &url])
            .await?;

        // reject anything that is not a JSON document before it gets stored
        serde_json::from_slice::<serde_json::Value>(&stdout).map_err(|e| FetchError::Tool {
            tool: self.yt_dlp_path.clone(),
            message: format!("invalid metadata JSON: {}", e),
        })?;
        Ok(stdout)
    }

    async fn download(&self, video_id: &str, target: &Path) -> Result<()> {
        let url = Self::video_url(video_id);
        let target = target.to_string_lossy();

        self.run(
            video_id,
            &[
                "--format",
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
                "--merge-output-format",
                "mp4",
                "--output",
                &target,
                "--no-playlist",
                "--concurrent-fragments",
                "4",
                "--newline",
                &url,
            ],
        )
        .await?;

        Ok(())
    }

    fn name(&self) -> String {
        "yt-dlp".to_string()
    }
}

/// Map yt-dlp's error output onto a fetch error
fn classify_failure(video_id: &str, stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().lines().last().unwrap_or("no output").to_string();

    const GONE: &[&str] = &["video unavailable", "private video", "404", "has been removed", "does not exist"];
    const NETWORK: &[&str] = &["timed out", "connection", "temporary failure", "network is unreachable", "429"];

    if GONE.iter().any(|needle| lower.contains(needle)) {
        FetchError::NotFound(video_id.to_string())
    } else if NETWORK.iter().any(|needle| lower.contains(needle)) {
        FetchError::Network {
            video_id: video_id.to_string(),
            message,
        }
    } else {
        FetchError::Tool {
            tool: "yt-dlp".to_string(),
            message,
        }
    }
}
