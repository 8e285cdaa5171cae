//! Adaptive-bitrate ladder planning.
//!
//! Rungs above the source height are dropped so the ladder never upscales.
//! When even the smallest rung is taller than the limit it is kept alone.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sv_av::actions::hls::playlist_name;
use sv_av::{HlsSpec, Rendition};
use sv_core::config::TranscodeConfig;
use sv_core::{Error, JobId, MediaInfo, Result};

use crate::layout::OutputLayout;

/// One entry of the default ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderRung {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
}

impl LadderRung {
    /// Stereo audio bitrate paired with this rung.
    pub fn audio_bitrate_kbps(&self) -> u32 {
        if self.height >= 720 {
            128
        } else {
            96
        }
    }
}

pub const DEFAULT_LADDER: [LadderRung; 5] = [
    LadderRung { name: "240p", width: 426, height: 240, video_bitrate_kbps: 400 },
    LadderRung { name: "360p", width: 640, height: 360, video_bitrate_kbps: 800 },
    LadderRung { name: "480p", width: 854, height: 480, video_bitrate_kbps: 1400 },
    LadderRung { name: "720p", width: 1280, height: 720, video_bitrate_kbps: 2800 },
    LadderRung { name: "1080p", width: 1920, height: 1080, video_bitrate_kbps: 5000 },
];

/// Rungs no taller than `max_height`, lowest first.
pub fn select_rungs(max_height: u32) -> Vec<LadderRung> {
    let rungs: Vec<LadderRung> = DEFAULT_LADDER
        .iter()
        .filter(|r| r.height <= max_height)
        .copied()
        .collect();
    if rungs.is_empty() {
        vec![DEFAULT_LADDER[0]]
    } else {
        rungs
    }
}

/// One rendition as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStream {
    pub name: String,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub playlist_path: PathBuf,
}

/// The playlists a ladder job produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HlsLadder {
    pub job_id: JobId,
    pub variants: Vec<VariantStream>,
    pub master_playlist_path: PathBuf,
}

impl HlsLadder {
    /// Master playlist followed by every rung playlist.
    pub fn expected_artifacts(&self) -> Vec<&Path> {
        std::iter::once(self.master_playlist_path.as_path())
            .chain(self.variants.iter().map(|v| v.playlist_path.as_path()))
            .collect()
    }

    /// Comma-separated rung names, stored as the job's target resolution.
    pub fn rung_names(&self) -> String {
        self.variants
            .iter()
            .map(|v| v.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Backend request plus the resulting ladder description.
#[derive(Debug, Clone)]
pub struct LadderPlan {
    pub spec: HlsSpec,
    pub ladder: HlsLadder,
}

/// Plan a ladder for `input`, whose probe result is `info`.
///
/// `max_height` defaults to the source height.
pub fn plan(
    job_id: JobId,
    layout: &OutputLayout,
    input: &Path,
    info: &MediaInfo,
    max_height: Option<u32>,
    config: &TranscodeConfig,
) -> Result<LadderPlan> {
    let limit = max_height.unwrap_or(info.height);
    if limit == 0 {
        return Err(Error::Validation(
            "cannot build a ladder without a video stream height".into(),
        ));
    }

    let renditions: Vec<Rendition> = select_rungs(limit)
        .into_iter()
        .map(|r| Rendition {
            name: r.name.to_string(),
            width: r.width,
            height: r.height,
            video_bitrate_kbps: capped(r.video_bitrate_kbps, config),
            audio_bitrate_kbps: r.audio_bitrate_kbps(),
        })
        .collect();

    let spec = HlsSpec {
        input: input.to_path_buf(),
        output_dir: layout.hls_dir(input),
        basename: OutputLayout::basename(input),
        renditions,
        segment_secs: config.segment_secs(),
        include_audio: info.has_audio(),
        video_codec: config.video_codec.clone(),
        audio_codec: config.audio_codec.clone(),
    };

    let ladder = HlsLadder {
        job_id,
        variants: spec
            .renditions
            .iter()
            .map(|r| VariantStream {
                name: r.name.clone(),
                height: r.height,
                bitrate_kbps: r.video_bitrate_kbps,
                playlist_path: spec.playlist_path(r),
            })
            .collect(),
        master_playlist_path: spec.master_path(),
    };

    Ok(LadderPlan { spec, ladder })
}

/// The variant `rung` produces in the ladder directory of `input`.
pub fn variant(
    layout: &OutputLayout,
    input: &Path,
    rung: &LadderRung,
    config: &TranscodeConfig,
) -> VariantStream {
    let basename = OutputLayout::basename(input);
    VariantStream {
        name: rung.name.to_string(),
        height: rung.height,
        bitrate_kbps: capped(rung.video_bitrate_kbps, config),
        playlist_path: layout.hls_dir(input).join(playlist_name(&basename, rung.name)),
    }
}

fn capped(kbps: u32, config: &TranscodeConfig) -> u32 {
    match config.max_video_bitrate_kbps {
        0 => kbps,
        ceiling => kbps.min(ceiling),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heights(rungs: &[LadderRung]) -> Vec<u32> {
        rungs.iter().map(|r| r.height).collect()
    }

    #[test]
    fn rungs_are_capped_by_height() {
        assert_eq!(heights(&select_rungs(500)), vec![240, 360, 480]);
        assert_eq!(heights(&select_rungs(1080)), vec![240, 360, 480, 720, 1080]);
        assert_eq!(heights(&select_rungs(4320)).len(), 5);
    }

    #[test]
    fn tiny_sources_keep_the_lowest_rung() {
        assert_eq!(heights(&select_rungs(100)), vec![240]);
        assert_eq!(heights(&select_rungs(0)), vec![240]);
    }

    fn source(height: u32, audio: bool) -> MediaInfo {
        MediaInfo {
            path: PathBuf::from("/media/movie.mkv"),
            format: "matroska".into(),
            duration_ms: 60_000,
            width: height * 16 / 9,
            height,
            video_codec: (height > 0).then(|| "h264".to_string()),
            audio_codec: audio.then(|| "aac".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn plan_uses_source_height_and_layout() {
        let layout = OutputLayout::new("/out");
        let input = Path::new("/media/movie.mkv");
        let job_id = JobId::new();
        let plan = plan(job_id, &layout, input, &source(720, true), None, &TranscodeConfig::default())
            .unwrap();

        assert_eq!(plan.ladder.rung_names(), "240p,360p,480p,720p");
        assert_eq!(plan.ladder.job_id, job_id);
        assert_eq!(
            plan.ladder.master_playlist_path,
            PathBuf::from("/out/movie_hls/master.m3u8")
        );
        assert_eq!(
            plan.ladder.variants[3].playlist_path,
            PathBuf::from("/out/movie_hls/movie_720p.m3u8")
        );
        assert_eq!(plan.ladder.expected_artifacts().len(), 5);
        assert!(plan.spec.include_audio);
        assert_eq!(plan.spec.segment_secs, 6);
    }

    #[test]
    fn explicit_max_height_and_bitrate_ceiling() {
        let layout = OutputLayout::new("/out");
        let config = TranscodeConfig {
            max_video_bitrate_kbps: 1000,
            ..Default::default()
        };
        let plan = plan(
            JobId::new(),
            &layout,
            Path::new("/media/movie.mkv"),
            &source(1080, false),
            Some(500),
            &config,
        )
        .unwrap();
        assert_eq!(plan.ladder.rung_names(), "240p,360p,480p");
        assert_eq!(plan.spec.renditions[2].video_bitrate_kbps, 1000);
        assert!(!plan.spec.include_audio);
    }

    #[test]
    fn variant_matches_planned_playlist() {
        let layout = OutputLayout::new("/out");
        let input = Path::new("/media/movie.mkv");
        let config = TranscodeConfig::default();
        let plan = plan(JobId::new(), &layout, input, &source(1080, true), None, &config).unwrap();

        let rebuilt = variant(&layout, input, &DEFAULT_LADDER[4], &config);
        assert_eq!(rebuilt, plan.ladder.variants[4]);
    }

    #[test]
    fn audio_only_source_is_rejected() {
        let err = plan(
            JobId::new(),
            &OutputLayout::new("/out"),
            Path::new("/media/song.flac"),
            &source(0, true),
            None,
            &TranscodeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
