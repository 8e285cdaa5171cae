//! Still-frame planning for thumbnails and storyboards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sv_av::ThumbnailSpec;
use sv_core::config::TranscodeConfig;
use sv_core::{Error, MediaInfo, Result};

use crate::layout::OutputLayout;

/// Evenly spaced offsets strictly inside the media: `duration/(count+1) * i`
/// for `i` in `1..=count`.
pub fn storyboard_offsets(duration: Duration, count: u32) -> Result<Vec<Duration>> {
    if count == 0 {
        return Err(Error::Validation("storyboard frame count must be at least 1".into()));
    }
    if duration.is_zero() {
        return Err(Error::Validation(
            "storyboard needs a known, non-zero duration".into(),
        ));
    }
    let slots = count
        .checked_add(1)
        .ok_or_else(|| Error::Validation(format!("storyboard frame count {count} is too large")))?;
    let step = duration / slots;
    Ok((1..=count).map(|i| step * i).collect())
}

/// A single thumbnail at `offset`.
pub fn thumbnail_spec(
    layout: &OutputLayout,
    input: &Path,
    offset: Duration,
    config: &TranscodeConfig,
) -> ThumbnailSpec {
    ThumbnailSpec {
        input: input.to_path_buf(),
        output: layout.thumbnail(input),
        offset,
        width: config.thumbnail_width,
        height: config.thumbnail_height,
    }
}

/// Every frame of a storyboard, in offset order.
#[derive(Debug, Clone)]
pub struct StoryboardPlan {
    pub dir: PathBuf,
    pub frames: Vec<ThumbnailSpec>,
}

impl StoryboardPlan {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Plan `count` frames across the probed duration of `input`.
pub fn storyboard_plan(
    layout: &OutputLayout,
    input: &Path,
    info: &MediaInfo,
    count: u32,
    config: &TranscodeConfig,
) -> Result<StoryboardPlan> {
    let duration = info.duration().unwrap_or_default();
    let offsets = storyboard_offsets(duration, count)?;
    let frames = offsets
        .into_iter()
        .zip(1u32..)
        .map(|(offset, n)| ThumbnailSpec {
            input: input.to_path_buf(),
            output: layout.storyboard_frame(input, n),
            offset,
            width: config.thumbnail_width,
            height: config.thumbnail_height,
        })
        .collect();
    Ok(StoryboardPlan {
        dir: layout.storyboard_dir(input),
        frames,
    })
}
