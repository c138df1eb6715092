use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;

use super::{entries, run_tool};
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::Result;

/// Extracts a mono 16-bit PCM track from the source video with ffmpeg
pub struct AudioExecutor {
    sample_rate: u32,
    channels: u8,
}

impl AudioExecutor {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    fn ffmpeg_args(&self, source: &Path, target: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into(), "-i".into()];
        args.push(source.into());
        args.extend(
            [
                "-vn".to_string(),
                "-acodec".to_string(),
                "pcm_s16le".to_string(),
                "-ar".to_string(),
                self.sample_rate.to_string(),
                "-ac".to_string(),
                self.channels.to_string(),
                "-y".to_string(),
            ]
            .map(OsString::from),
        );
        args.push(target.into());
        args
    }
}

#[async_trait]
impl StageExecutor for AudioExecutor {
    fn stage(&self) -> Stage {
        Stage::Audio
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let target = ctx.output_path();
        tracing::debug!("Converting {} to WAV", ctx.source.display());

        run_tool("ffmpeg", self.ffmpeg_args(ctx.source, &target)).await?;

        let size = tokio::fs::metadata(&target).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            anyhow::bail!("ffmpeg produced no audio for {}", ctx.source_file());
        }

        Ok(entries([
            ("source_file", ctx.source_file().to_string()),
            ("conversion_tool", "ffmpeg".to_string()),
            ("sample_rate", self.sample_rate.to_string()),
            ("channels", self.channels.to_string()),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_arguments() {
        let args = AudioExecutor::new(16000, 1).ffmpeg_args(Path::new("/w/a.mp4"), Path::new("/w/a.wav"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[3..5], ["-i", "/w/a.mp4"]);
        assert!(args.windows(2).any(|w| w == ["-acodec", "pcm_s16le"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "16000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args.last().unwrap(), "/w/a.wav");
    }
}
