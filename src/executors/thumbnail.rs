use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::ffi::OsStr;
use std::time::Duration;

use super::{entries, run_tool};
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
struct ThumbnailEntry {
    url: String,
    #[serde(default)]
    width: Option<u64>,
    #[serde(default)]
    height: Option<u64>,
}

impl ThumbnailEntry {
    fn area(&self) -> u64 {
        self.width.unwrap_or(0) * self.height.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct VideoMetadata {
    #[serde(default)]
    thumbnails: Vec<ThumbnailEntry>,
}

/// Pick the thumbnail to download: the `maxresdefault` rendition when listed, else the largest
fn select_thumbnail(document: &[u8]) -> Result<(String, &'static str)> {
    let metadata: VideoMetadata = serde_json::from_slice(document).context("Invalid metadata JSON")?;

    if let Some(entry) = metadata.thumbnails.iter().find(|t| t.url.contains("maxresdefault")) {
        return Ok((entry.url.clone(), "youtube_maxres"));
    }

    metadata
        .thumbnails
        .iter()
        .max_by_key(|t| t.area())
        .map(|t| (t.url.clone(), "largest_available"))
        .ok_or_else(|| anyhow::anyhow!("No thumbnails listed in video metadata"))
}

/// Whether the URL's path already names a WebP image
fn is_webp(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| u.path().to_lowercase().ends_with(".webp"))
        .unwrap_or(false)
}

/// Downloads the best thumbnail named in the raw metadata, converting to WebP when needed
pub struct ThumbnailExecutor {
    client: Client,
}

impl ThumbnailExecutor {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for ThumbnailExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageExecutor for ThumbnailExecutor {
    fn stage(&self) -> Stage {
        Stage::Thumbnail
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let document = tokio::fs::read(ctx.input(Stage::RawMetadata)?).await?;
        let (url, kind) = select_thumbnail(&document)?;
        tracing::info!(video_id = %ctx.job.video_id, "Downloading thumbnail {}", url);

        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to download thumbnail {}", url))?
            .bytes()
            .await?;

        let target = ctx.output_path();
        if is_webp(&url) {
            tokio::fs::write(&target, &bytes).await?;
        } else {
            let original = ctx.workdir.join(format!("{}-thumbnail-src", ctx.job.base_name));
            tokio::fs::write(&original, &bytes).await?;
            run_tool(
                "ffmpeg",
                [
                    OsStr::new("-hide_banner"),
                    OsStr::new("-loglevel"),
                    OsStr::new("error"),
                    OsStr::new("-i"),
                    original.as_os_str(),
                    OsStr::new("-y"),
                    target.as_os_str(),
                ],
            )
            .await?;
        }

        Ok(entries([
            ("source_file", ctx.source_file().to_string()),
            ("thumbnail_type", kind.to_string()),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_maxresdefault() {
        let document = br#"{"thumbnails": [
            {"url": "https://i.ytimg.com/vi/a/hqdefault.jpg", "width": 4000, "height": 3000},
            {"url": "https://i.ytimg.com/vi_webp/a/maxresdefault.webp"}
        ]}"#;
        let (url, kind) = select_thumbnail(document).unwrap();
        assert_eq!(url, "https://i.ytimg.com/vi_webp/a/maxresdefault.webp");
        assert_eq!(kind, "youtube_maxres");
    }

    #[test]
    fn test_falls_back_to_largest() {
        let document = br#"{"thumbnails": [
            {"url": "https://x/small.jpg", "width": 120, "height": 90},
            {"url": "https://x/big.jpg", "width": 640, "height": 480},
            {"url": "https://x/unsized.jpg"}
        ]}"#;
        assert_eq!(select_thumbnail(document).unwrap().0, "https://x/big.jpg");
    }

    #[test]
    fn test_no_thumbnails_is_an_error() {
        assert!(select_thumbnail(br#"{"title": "x"}"#).is_err());
        assert!(select_thumbnail(b"not json").is_err());
    }

    #[test]
    fn test_webp_detection_ignores_query() {
        assert!(is_webp("https://i.ytimg.com/vi_webp/a/maxresdefault.webp?v=1"));
        assert!(!is_webp("https://i.ytimg.com/vi/a/maxresdefault.jpg"));
    }
}
