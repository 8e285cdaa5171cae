//! Multi-rendition HLS ladder command construction.
//!
//! A single ffmpeg invocation encodes every rendition and writes per-rung
//! playlists, `.ts` segments and the master manifest into one directory:
//!
//! - `<dir>/master.m3u8`
//! - `<dir>/<base>_<rung>.m3u8`
//! - `<dir>/<base>_<rung>_000.ts`, `<base>_<rung>_001.ts`, ...

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::transcode::{audio_encoder, video_encoder};
use crate::command::ToolCommand;

/// File name of the master manifest inside the ladder directory.
pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// One rung of the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    /// Rung name used in file names, e.g. "720p".
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlsSpec {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Input basename used as the file name prefix.
    pub basename: String,
    pub renditions: Vec<Rendition>,
    pub segment_secs: u32,
    /// Map an audio stream into every rendition.
    pub include_audio: bool,
    pub video_codec: String,
    pub audio_codec: String,
}

impl HlsSpec {
    pub fn master_path(&self) -> PathBuf {
        self.output_dir.join(MASTER_PLAYLIST)
    }

    pub fn playlist_path(&self, rendition: &Rendition) -> PathBuf {
        self.output_dir.join(playlist_name(&self.basename, &rendition.name))
    }
}

/// `<base>_<rung>.m3u8`
pub fn playlist_name(basename: &str, rung: &str) -> String {
    format!("{basename}_{rung}.m3u8")
}

/// File name prefix shared by every segment of one rung.
pub fn segment_prefix(basename: &str, rung: &str) -> String {
    format!("{basename}_{rung}_")
}

/// Build the ffmpeg invocation for the whole ladder.
pub fn ffmpeg_command(ffmpeg: &Path, spec: &HlsSpec) -> ToolCommand {
    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.args(["-hide_banner", "-nostdin", "-y", "-i"]);
    cmd.arg(spec.input.to_string_lossy().as_ref());

    for _ in &spec.renditions {
        cmd.args(["-map", "0:v:0"]);
        if spec.include_audio {
            cmd.args(["-map", "0:a:0"]);
        }
    }

    cmd.args(["-c:v", video_encoder(&spec.video_codec)]);
    if spec.include_audio {
        cmd.args(["-c:a", audio_encoder(&spec.audio_codec), "-ac", "2"]);
    }

    // Keyframes on segment boundaries so every rendition cuts identically.
    cmd.args(["-sc_threshold", "0"]);
    cmd.args([
        "-force_key_frames",
        &format!("expr:gte(t,n_forced*{})", spec.segment_secs),
    ]);

    for (i, r) in spec.renditions.iter().enumerate() {
        let vb = r.video_bitrate_kbps;
        cmd.args([format!("-filter:v:{i}"), format!("scale=-2:{}", r.height)]);
        cmd.args([format!("-b:v:{i}"), format!("{vb}k")]);
        cmd.args([format!("-maxrate:v:{i}"), format!("{vb}k")]);
        cmd.args([format!("-bufsize:v:{i}"), format!("{}k", vb.saturating_mul(2))]);
        if spec.include_audio {
            cmd.args([format!("-b:a:{i}"), format!("{}k", r.audio_bitrate_kbps)]);
        }
    }

    cmd.args(["-f", "hls"]);
    cmd.args(["-hls_time", &spec.segment_secs.to_string()]);
    cmd.args(["-hls_playlist_type", "vod"]);
    cmd.args(["-hls_flags", "independent_segments"]);
    cmd.args([
        "-hls_segment_filename",
        &spec
            .output_dir
            .join(format!("{}_%v_%03d.ts", spec.basename))
            .to_string_lossy(),
    ]);
    cmd.args(["-master_pl_name", MASTER_PLAYLIST]);
    cmd.args(["-var_stream_map", &var_stream_map(spec)]);
    cmd.arg(
        spec.output_dir
            .join(format!("{}_%v.m3u8", spec.basename))
            .to_string_lossy()
            .as_ref(),
    );
    cmd
}

/// `v:0,a:0,name:240p v:1,a:1,name:360p ...`
fn var_stream_map(spec: &HlsSpec) -> String {
    spec.renditions
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if spec.include_audio {
                format!("v:{i},a:{i},name:{}", r.name)
            } else {
                format!("v:{i},name:{}", r.name)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rung(name: &str, height: u32, vb: u32) -> Rendition {
        Rendition {
            name: name.into(),
            width: height * 16 / 9,
            height,
            video_bitrate_kbps: vb,
            audio_bitrate_kbps: 96,
        }
    }

    fn spec(include_audio: bool) -> HlsSpec {
        HlsSpec {
            input: PathBuf::from("/media/movie.mkv"),
            output_dir: PathBuf::from("/out/movie_hls"),
            basename: "movie".into(),
            renditions: vec![rung("240p", 240, 400), rung("360p", 360, 800)],
            segment_secs: 6,
            include_audio,
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
        }
    }

    #[test]
    fn one_invocation_covers_all_rungs() {
        let cmd = ffmpeg_command(Path::new("ffmpeg"), &spec(true));
        let args = cmd.get_args();
        assert_eq!(args.iter().filter(|a| *a == "0:v:0").count(), 2);
        assert_eq!(args.iter().filter(|a| *a == "0:a:0").count(), 2);
        assert!(args.iter().any(|a| a == "v:0,a:0,name:240p v:1,a:1,name:360p"));
        assert!(args.iter().any(|a| a == "scale=-2:360"));
        assert!(args.iter().any(|a| a == "/out/movie_hls/movie_%v_%03d.ts"));
        assert_eq!(args.last().map(String::as_str), Some("/out/movie_hls/movie_%v.m3u8"));
        assert!(args.iter().any(|a| a == MASTER_PLAYLIST));
    }

    #[test]
    fn video_only_sources_skip_audio_mapping() {
        let cmd = ffmpeg_command(Path::new("ffmpeg"), &spec(false));
        let args = cmd.get_args();
        assert!(!args.iter().any(|a| a == "0:a:0" || a.starts_with("-b:a")));
        assert!(args.iter().any(|a| a == "v:0,name:240p v:1,name:360p"));
    }

    #[test]
    fn naming_helpers() {
        let s = spec(true);
        assert_eq!(s.master_path(), PathBuf::from("/out/movie_hls/master.m3u8"));
        assert_eq!(
            s.playlist_path(&s.renditions[1]),
            PathBuf::from("/out/movie_hls/movie_360p.m3u8")
        );
        assert_eq!(segment_prefix("movie", "240p"), "movie_240p_");
    }
}
