//! Engine configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! tool, transcode and storage sections. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (key, path) in [
            ("tools.native_transcoder_path", &self.tools.native_transcoder_path),
            ("tools.ffmpeg_path", &self.tools.ffmpeg_path),
            ("tools.ffprobe_path", &self.tools.ffprobe_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!(
                        "{key} points to {} which does not exist; PATH lookup will be used",
                        p.display()
                    ));
                }
            }
        }

        let t = &self.transcode;
        if t.max_concurrent_jobs == 0 {
            warnings.push("transcode.max_concurrent_jobs is 0; 1 will be used".into());
        }
        if !(2..=3).contains(&t.progress_interval_secs) {
            warnings.push(format!(
                "transcode.progress_interval_secs is {}; 2-3 seconds is recommended",
                t.progress_interval_secs
            ));
        }
        if t.hls_segment_secs == 0 {
            warnings.push("transcode.hls_segment_secs is 0; 6 will be used".into());
        }
        if t.max_video_bitrate_kbps == 0 {
            warnings.push("transcode.max_video_bitrate_kbps is 0; bitrates will not be capped".into());
        }
        if t.storyboard_frames == 0 {
            warnings.push("transcode.storyboard_frames is 0; storyboards need at least 1 frame".into());
        }
        if t.storyboard_frames > t.max_storyboard_frames {
            warnings.push(format!(
                "transcode.storyboard_frames ({}) exceeds max_storyboard_frames ({}); storyboards will be rejected",
                t.storyboard_frames, t.max_storyboard_frames
            ));
        }
        if t.job_timeout_secs == Some(0) {
            warnings.push("transcode.job_timeout_secs is 0; every job would time out".into());
        }

        let video = ["h264", "h265", "hevc", "vp9", "av1"];
        if !video.contains(&t.video_codec.as_str()) {
            warnings.push(format!(
                "transcode.video_codec '{}' is not a recognized codec (valid: {})",
                t.video_codec,
                video.join(", ")
            ));
        }
        let audio = ["aac", "opus", "mp3"];
        if !audio.contains(&t.audio_codec.as_str()) {
            warnings.push(format!(
                "transcode.audio_codec '{}' is not a recognized codec (valid: {})",
                t.audio_codec,
                audio.join(", ")
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools. Unset paths are resolved through `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// The native `streamvio-transcoder` binary.
    pub native_transcoder_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Job engine and encoding defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Upper bound on concurrently running backend processes.
    pub max_concurrent_jobs: usize,
    /// Ceiling applied to every profile's video bitrate. 0 disables it.
    pub max_video_bitrate_kbps: u32,
    pub video_codec: String,
    pub audio_codec: String,
    /// Ask the backend to use hardware decoding when it can.
    pub hw_accel: bool,
    pub hls_segment_secs: u32,
    pub progress_interval_secs: u64,
    /// How long terminal job handles stay in memory.
    pub handle_retention_secs: u64,
    /// Optional wall-clock limit per job. `None` means no limit.
    pub job_timeout_secs: Option<u64>,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub storyboard_frames: u32,
    /// Largest storyboard a caller may request.
    pub max_storyboard_frames: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_video_bitrate_kbps: 8000,
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            hw_accel: false,
            hls_segment_secs: 6,
            progress_interval_secs: 2,
            handle_retention_secs: 3600,
            job_timeout_secs: None,
            thumbnail_width: 320,
            thumbnail_height: 180,
            storyboard_frames: 10,
            max_storyboard_frames: 200,
        }
    }
}

impl TranscodeConfig {
    /// Effective concurrency bound (never below 1).
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }

    /// Effective HLS segment length in seconds (never 0).
    pub fn segment_secs(&self) -> u32 {
        if self.hls_segment_secs == 0 {
            6
        } else {
            self.hls_segment_secs
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    pub fn handle_retention(&self) -> Duration {
        Duration::from_secs(self.handle_retention_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// Where artifacts and the job database live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data/transcoded"),
            db_path: PathBuf::from("./data/streamvio.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.transcode.max_concurrent_jobs, 2);
        assert_eq!(cfg.transcode.hls_segment_secs, 6);
        assert_eq!(cfg.transcode.handle_retention(), Duration::from_secs(3600));
        assert_eq!(cfg.transcode.job_timeout(), None);
        assert_eq!(cfg.transcode.thumbnail_width, 320);
        assert_eq!(cfg.transcode.thumbnail_height, 180);
        assert_eq!(cfg.transcode.max_storyboard_frames, 200);
        assert_eq!(cfg.storage.output_dir, PathBuf::from("./data/transcoded"));
    }

    #[test]
    fn default_config_no_warnings() {
        let warnings = Config::default().validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"transcode": {"max_concurrent_jobs": 4, "job_timeout_secs": 600}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.transcode.max_concurrent_jobs, 4);
        assert_eq!(cfg.transcode.job_timeout(), Some(Duration::from_secs(600)));
        // Unspecified keys in a present section still default.
        assert_eq!(cfg.transcode.audio_codec, "aac");
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.transcode.video_codec, "h264");
        assert!(cfg.tools.ffmpeg_path.is_none());
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/streamvio.json")));
        assert_eq!(cfg.transcode.max_concurrent_jobs, 2);
    }

    #[test]
    fn zero_concurrency_is_clamped_and_warned() {
        let mut cfg = Config::default();
        cfg.transcode.max_concurrent_jobs = 0;
        assert_eq!(cfg.transcode.concurrency(), 1);
        assert!(cfg.validate().iter().any(|w| w.contains("max_concurrent_jobs")));
    }

    #[test]
    fn storyboard_default_above_limit_warns() {
        let mut cfg = Config::default();
        cfg.transcode.max_storyboard_frames = 5;
        assert!(cfg.validate().iter().any(|w| w.contains("max_storyboard_frames")));
    }

    #[test]
    fn unknown_codec_warns() {
        let mut cfg = Config::default();
        cfg.transcode.video_codec = "mpeg2".into();
        assert!(cfg.validate().iter().any(|w| w.contains("video_codec")));
    }

    #[test]
    fn missing_tool_path_warns() {
        let mut cfg = Config::default();
        cfg.tools.ffmpeg_path = Some(PathBuf::from("/nonexistent/ffmpeg"));
        assert!(cfg.validate().iter().any(|w| w.contains("tools.ffmpeg_path")));
    }
}
