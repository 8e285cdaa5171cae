//! Still-frame extraction command construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// Timeout for a single frame grab.
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(120);

/// One JPEG frame at a time offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub offset: Duration,
    pub width: u32,
    pub height: u32,
}

/// `ffmpeg -ss <offset> -i <in> -frames:v 1 ...`. Seeking before `-i` keeps
/// frame grabs fast on long inputs.
pub fn ffmpeg_command(ffmpeg: &Path, spec: &ThumbnailSpec) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.timeout(THUMBNAIL_TIMEOUT);
    cmd.args(["-hide_banner", "-nostdin", "-y"]);
    cmd.args(["-ss", &format!("{:.3}", spec.offset.as_secs_f64())]);
    cmd.arg("-i");
    cmd.arg(spec.input.to_string_lossy().as_ref());
    cmd.args(["-frames:v", "1", "-an"]);
    cmd.args([
        "-vf",
        &format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            spec.width, spec.height
        ),
    ]);
    cmd.args(["-q:v", "2"]);
    cmd.arg(spec.output.to_string_lossy().as_ref());
    cmd
}

/// `streamvio-transcoder thumbnail <in> <out> <offset_ms>`.
pub fn native_command(native: &Path, spec: &ThumbnailSpec) -> ToolCommand {
    let mut cmd = ToolCommand::new(native.to_path_buf());
    cmd.timeout(THUMBNAIL_TIMEOUT);
    cmd.arg("thumbnail");
    cmd.arg(spec.input.to_string_lossy().as_ref());
    cmd.arg(spec.output.to_string_lossy().as_ref());
    cmd.arg(spec.offset.as_millis().to_string());
    cmd
}
