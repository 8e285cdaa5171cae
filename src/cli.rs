use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sv_core::JobId;
use sv_transcode::ConnectionType;

#[derive(Parser)]
#[command(name = "streamvio")]
#[command(author, version, about = "Media transcoding engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Transcode a file to a single output using a profile
    Transcode {
        #[arg(required = true)]
        file: PathBuf,

        /// Profile name (unknown names fall back to "standard")
        #[arg(short, long, default_value = "standard")]
        profile: String,

        /// Media item the job belongs to
        #[arg(long, default_value_t = 0)]
        media_id: i64,

        /// Override the profile's width
        #[arg(long)]
        width: Option<u32>,

        /// Override the profile's height
        #[arg(long)]
        height: Option<u32>,

        /// Override the video bitrate (kbps)
        #[arg(long)]
        video_bitrate: Option<u32>,

        /// Override the audio bitrate (kbps)
        #[arg(long)]
        audio_bitrate: Option<u32>,

        /// Regenerate even if the output already exists
        #[arg(long)]
        force: bool,
    },

    /// Build an HLS adaptive bitrate ladder
    Hls {
        #[arg(required = true)]
        file: PathBuf,

        /// Tallest rung to produce (defaults to the source height)
        #[arg(long)]
        max_height: Option<u32>,

        #[arg(long, default_value_t = 0)]
        media_id: i64,

        #[arg(long)]
        force: bool,
    },

    /// Extract a single thumbnail
    Thumbnail {
        #[arg(required = true)]
        file: PathBuf,

        /// Position in seconds
        #[arg(long, default_value_t = 10.0)]
        offset: f64,

        #[arg(long, default_value_t = 0)]
        media_id: i64,
    },

    /// Extract evenly spaced storyboard frames
    Storyboard {
        #[arg(required = true)]
        file: PathBuf,

        /// Number of frames (defaults to transcode.storyboard_frames)
        #[arg(long)]
        count: Option<u32>,

        #[arg(long, default_value_t = 0)]
        media_id: i64,

        #[arg(long)]
        force: bool,
    },

    /// Show the persisted state of a job
    Status {
        job_id: JobId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pick a profile for a client device
    SelectProfile {
        #[arg(long)]
        mobile: bool,

        #[arg(long)]
        tablet: bool,

        /// 2g, 3g, 4g, wifi, ethernet or unknown
        #[arg(long, default_value = "unknown")]
        connection: ConnectionType,

        /// Measured bandwidth in kbps
        #[arg(long)]
        bandwidth: Option<u32>,
    },

    /// List the built-in profiles
    Profiles,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
