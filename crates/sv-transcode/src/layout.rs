//! Deterministic artifact paths under the output directory.
//!
//! ```text
//! <root>/<base>_<profile>.<ext>
//! <root>/<base>_hls/master.m3u8
//! <root>/<base>_hls/<base>_<rung>.m3u8
//! <root>/<base>_thumb.jpg
//! <root>/<base>_storyboard/<base>_thumb_<n>.jpg
//! ```

use std::path::{Path, PathBuf};

use sv_av::actions::hls::MASTER_PLAYLIST;
use sv_core::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Input file stem, used as the prefix of every artifact.
    pub fn basename(input: &Path) -> String {
        input
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("output")
            .to_string()
    }

    pub fn single_file(&self, input: &Path, profile: &str, ext: &str) -> PathBuf {
        self.root
            .join(format!("{}_{profile}.{ext}", Self::basename(input)))
    }

    pub fn hls_dir(&self, input: &Path) -> PathBuf {
        self.root.join(format!("{}_hls", Self::basename(input)))
    }

    pub fn hls_master(&self, input: &Path) -> PathBuf {
        self.hls_dir(input).join(MASTER_PLAYLIST)
    }

    pub fn thumbnail(&self, input: &Path) -> PathBuf {
        self.root.join(format!("{}_thumb.jpg", Self::basename(input)))
    }

    pub fn storyboard_dir(&self, input: &Path) -> PathBuf {
        self.root.join(format!("{}_storyboard", Self::basename(input)))
    }

    /// Frame `n` of a storyboard, counting from 1.
    pub fn storyboard_frame(&self, input: &Path, n: u32) -> PathBuf {
        let base = Self::basename(input);
        self.storyboard_dir(input).join(format!("{base}_thumb_{n}.jpg"))
    }
}

/// Sibling of `target` that one job writes into before the result is
/// renamed into place. The extension is kept so backends still pick the
/// right muxer.
///
/// `/out/movie_standard.mp4` becomes `/out/movie_standard.<id>.part.mp4`,
/// `/out/movie_hls` becomes `/out/movie_hls.<id>.part`.
pub fn staging_path(target: &Path, job_id: JobId) -> PathBuf {
    let tag = job_id.as_uuid().simple();
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let name = match target.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{tag}.part.{ext}"),
        None => format!("{stem}.{tag}.part"),
    };
    target.with_file_name(name)
}
