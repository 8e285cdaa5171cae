//! Backend command construction for each operation: probe, single-file
//! transcode, thumbnail, and HLS ladder.

pub mod hls;
pub mod thumbnail;
pub mod transcode;

use std::path::{Path, PathBuf};

use crate::backend::Operation;
use crate::command::ToolCommand;

pub use hls::{HlsSpec, Rendition};
pub use thumbnail::ThumbnailSpec;
pub use transcode::TranscodeSpec;

/// A unit of backend work, independent of which backend will run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Probe { input: PathBuf },
    Transcode(TranscodeSpec),
    Thumbnail(ThumbnailSpec),
    Hls(HlsSpec),
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Probe { .. } => Operation::Probe,
            Self::Transcode(_) => Operation::Transcode,
            Self::Thumbnail(_) => Operation::Thumbnail,
            Self::Hls(_) => Operation::Hls,
        }
    }

    pub fn input(&self) -> &Path {
        match self {
            Self::Probe { input } => input,
            Self::Transcode(s) => &s.input,
            Self::Thumbnail(s) => &s.input,
            Self::Hls(s) => &s.input,
        }
    }
}

/// `ffprobe -v quiet -print_format json -show_format -show_streams <in>`
pub fn ffprobe_command(ffprobe: &Path, input: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffprobe.to_path_buf());
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]);
    cmd.arg(input.to_string_lossy().as_ref());
    cmd
}

/// `streamvio-transcoder info <in>`
pub fn native_info_command(native: &Path, input: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new(native.to_path_buf());
    cmd.arg("info");
    cmd.arg(input.to_string_lossy().as_ref());
    cmd
}
