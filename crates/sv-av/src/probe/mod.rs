//! Media probing.
//!
//! Each backend reports media properties in its own format. The raw output
//! is captured as a [`ProbeOutput`] variant and normalized into
//! [`sv_core::MediaInfo`] by the matching parser, so callers never branch on
//! which backend ran.

pub mod ffprobe;
pub mod native;

use std::path::Path;

use async_trait::async_trait;
use sv_core::MediaInfo;

/// Raw probe output tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutput {
    /// Labelled text lines from `streamvio-transcoder info`.
    NativeText(String),
    /// JSON from `ffprobe -show_format -show_streams`.
    FfprobeJson(String),
}

impl ProbeOutput {
    /// Parse into the normalized media description.
    pub fn normalize(&self, path: &Path) -> sv_core::Result<MediaInfo> {
        match self {
            Self::NativeText(text) => native::parse(path, text),
            Self::FfprobeJson(json) => ffprobe::parse(path, json),
        }
    }
}

/// Something that can describe a media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> sv_core::Result<MediaInfo>;
}
