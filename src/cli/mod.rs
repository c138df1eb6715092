use clap::{Parser, Subcommand, ValueEnum};

use crate::pipeline::OrderingPolicy;

#[derive(Parser)]
#[command(
    name = "reelsmith",
    about = "Reelsmith - resumable video pipeline: audio, transcript, AI write-ups and social posts",
    version,
    long_about = "Processes videos stored in S3-compatible object storage into audio, a transcript, an AI analysis, a LinkedIn post and a Bluesky post. Every artifact is written back to the store, so re-running a job only does the work that is missing."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text", env = "REELSMITH_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline for one video stored as `folder/name.mp4`
    Process {
        /// Store path of the source video
        #[arg(value_name = "PATH")]
        path: String,

        /// Regenerate every artifact even if it already exists
        #[arg(short, long)]
        force: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Process every video listed in a stored playlist manifest
    Playlist {
        /// Manifest name under the playlist folder
        #[arg(value_name = "NAME")]
        name: String,

        /// Regenerate every artifact even if it already exists
        #[arg(short, long)]
        force: bool,

        /// Processing order (defaults to the configured policy)
        #[arg(long, value_enum)]
        order: Option<OrderingPolicy>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Download a video and its metadata into the store
    Fetch {
        /// Video id or URL
        #[arg(value_name = "VIDEO_ID")]
        video_id: String,

        /// Target folder (defaults to the configured downloads folder)
        #[arg(long)]
        folder: Option<String>,

        /// Run the pipeline on the video once stored
        #[arg(long)]
        process: bool,
    },

    /// Show which artifacts already exist for a video
    Status {
        /// Store path of the source video
        #[arg(value_name = "PATH")]
        path: String,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List the pipeline stages and whether they are enabled
    Stages,

    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON document
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}
