//! Single-file transcode command construction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// Everything a backend needs to encode one output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Container / file extension ("mp4", "webm", "mkv").
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub width: u32,
    pub height: u32,
    pub hw_accel: bool,
}

/// Map a codec name to the ffmpeg software encoder.
pub(crate) fn video_encoder(codec: &str) -> &str {
    match codec {
        "h264" => "libx264",
        "h265" | "hevc" => "libx265",
        "vp9" => "libvpx-vp9",
        "av1" => "libaom-av1",
        other => other,
    }
}

pub(crate) fn audio_encoder(codec: &str) -> &str {
    match codec {
        "aac" => "aac",
        "opus" => "libopus",
        "mp3" => "libmp3lame",
        other => other,
    }
}

/// Scale filter that fits the source inside `width`x`height` without
/// upscaling and keeps both dimensions even.
pub(crate) fn fit_filter(width: u32, height: u32) -> String {
    format!(
        "scale='min({width},iw)':'min({height},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2"
    )
}

/// Build the ffmpeg invocation for a single-file transcode.
///
/// MP4 output is written fragmented so the partially written file can be
/// re-probed while the encode is still running.
pub fn ffmpeg_command(ffmpeg: &Path, spec: &TranscodeSpec) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.args(["-hide_banner", "-nostdin", "-y"]);

    // Hardware decode flags must appear before -i.
    if spec.hw_accel {
        cmd.args(["-hwaccel", "auto"]);
    }

    cmd.arg("-i");
    cmd.arg(spec.input.to_string_lossy().as_ref());
    cmd.args(["-map", "0:v:0?", "-map", "0:a:0?"]);

    let vb = spec.video_bitrate_kbps;
    cmd.args(["-c:v", video_encoder(&spec.video_codec)]);
    cmd.args(["-b:v", &format!("{vb}k")]);
    cmd.args(["-maxrate", &format!("{vb}k")]);
    cmd.args(["-bufsize", &format!("{}k", vb.saturating_mul(2))]);
    cmd.args(["-vf", &fit_filter(spec.width, spec.height)]);

    cmd.args(["-c:a", audio_encoder(&spec.audio_codec)]);
    cmd.args(["-b:a", &format!("{}k", spec.audio_bitrate_kbps)]);
    cmd.args(["-ac", "2"]);

    if spec.container == "mp4" {
        cmd.args(["-movflags", "+frag_keyframe+empty_moov+default_base_moof"]);
    }

    cmd.arg(spec.output.to_string_lossy().as_ref());
    cmd
}

/// Build the native transcoder invocation:
/// `transcode <in> <out> --format= --vcodec= --acodec= --vbitrate= --abitrate= --width= --height= [--no-hwaccel]`.
pub fn native_command(native: &Path, spec: &TranscodeSpec) -> ToolCommand {
    let mut cmd = ToolCommand::new(native.to_path_buf());
    cmd.arg("transcode");
    cmd.arg(spec.input.to_string_lossy().as_ref());
    cmd.arg(spec.output.to_string_lossy().as_ref());
    cmd.arg(format!("--format={}", spec.container));
    cmd.arg(format!("--vcodec={}", spec.video_codec));
    cmd.arg(format!("--acodec={}", spec.audio_codec));
    cmd.arg(format!("--vbitrate={}", spec.video_bitrate_kbps));
    cmd.arg(format!("--abitrate={}", spec.audio_bitrate_kbps));
    cmd.arg(format!("--width={}", spec.width));
    cmd.arg(format!("--height={}", spec.height));
    if !spec.hw_accel {
        cmd.arg("--no-hwaccel");
    }
    cmd
}
