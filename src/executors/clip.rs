use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;

use super::{entries, run_tool};
use crate::pipeline::{Stage, StageContext, StageExecutor, StageMetadata};
use crate::Result;

/// Seconds the thumbnail is shown before the video starts
const INTRO_SECONDS: u32 = 2;

/// Length the video body is trimmed to
const BODY_SECONDS: u32 = 170;

/// Renders a short, upload-sized clip: a still of the thumbnail followed by the start of the video
pub struct ShortClipExecutor;

impl ShortClipExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShortClipExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Even-sided frame size of the source's first video stream
async fn probe_dimensions(source: &Path) -> Result<(u32, u32)> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "json",
    ]
    .map(OsString::from)
    .to_vec();
    args.push(source.into());

    let stdout = run_tool("ffprobe", args).await?;
    parse_dimensions(&stdout)
}

fn parse_dimensions(probe: &[u8]) -> Result<(u32, u32)> {
    let probe: serde_json::Value = serde_json::from_slice(probe)?;
    let stream = &probe["streams"][0];
    match (stream["width"].as_u64(), stream["height"].as_u64()) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            Ok(((width as u32) & !1, (height as u32) & !1))
        }
        _ => anyhow::bail!("Source has no video stream"),
    }
}

fn clip_args(thumbnail: &Path, source: &Path, target: &Path, width: u32, height: u32) -> Vec<OsString> {
    let filter = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,\
         setsar=1,fps=30,format=yuv420p[intro];\
         [2:v]scale={w}:{h},setsar=1,fps=30,format=yuv420p[body];\
         [2:a]aresample=44100,aformat=channel_layouts=stereo[sound];\
         [intro][1:a][body][sound]concat=n=2:v=1:a=1[v][a]",
        w = width,
        h = height
    );

    let intro = INTRO_SECONDS.to_string();
    let body = BODY_SECONDS.to_string();
    let extend = |args: &mut Vec<OsString>, values: &[&str]| args.extend(values.iter().map(OsString::from));

    let mut args: Vec<OsString> = Vec::new();
    extend(&mut args, &["-hide_banner", "-loglevel", "error"]);
    extend(&mut args, &["-loop", "1", "-t", &intro, "-i"]);
    args.push(thumbnail.into());
    extend(&mut args, &["-f", "lavfi", "-t", &intro, "-i", "anullsrc=r=44100:cl=stereo"]);
    extend(&mut args, &["-t", &body, "-i"]);
    args.push(source.into());
    extend(
        &mut args,
        &[
            "-filter_complex",
            &filter,
            "-map",
            "[v]",
            "-map",
            "[a]",
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
            "-movflags",
            "+faststart",
            "-y",
        ],
    );
    args.push(target.into());
    args
}

#[async_trait]
impl StageExecutor for ShortClipExecutor {
    fn stage(&self) -> Stage {
        Stage::ShortClip
    }

    async fn produce(&self, ctx: &StageContext<'_>) -> Result<StageMetadata> {
        let thumbnail = ctx.input(Stage::Thumbnail)?;
        let (width, height) = probe_dimensions(ctx.source).await?;
        tracing::info!(
            video_id = %ctx.job.video_id,
            "Rendering {}x{} clip with a {}s thumbnail intro",
            width,
            height,
            INTRO_SECONDS
        );

        let target = ctx.output_path();
        run_tool("ffmpeg", clip_args(thumbnail, ctx.source, &target, width, height)).await?;

        Ok(entries([
            ("source_file", ctx.source_file().to_string()),
            ("video_type", "small_with_thumbnail_intro".to_string()),
            ("processing_tool", "ffmpeg".to_string()),
        ]))
    }
}
