//! Parser for `ffprobe -print_format json -show_format -show_streams`.
//!
//! Maps the JSON document into a normalized [`sv_core::MediaInfo`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use sv_core::MediaInfo;

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse ffprobe JSON output for `path`.
pub fn parse(path: &Path, json: &str) -> sv_core::Result<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| sv_core::Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let Some(format) = output.format else {
        return Err(sv_core::Error::Probe(
            "ffprobe output has no format section".into(),
        ));
    };

    let mut info = MediaInfo {
        path: path.to_path_buf(),
        // "mov,mp4,m4a,3gp,3g2,mj2" -> "mov"
        format: format
            .format_name
            .as_deref()
            .and_then(|s| s.split(',').next())
            .unwrap_or_default()
            .to_string(),
        duration_ms: format
            .duration
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * 1000.0).round() as u64)
            .unwrap_or(0),
        metadata: tags_to_metadata(format.tags),
        ..Default::default()
    };

    let container_kbps = kbps(format.bit_rate.as_deref());

    for stream in output.streams {
        match stream.codec_type.as_deref() {
            Some("video") if info.video_codec.is_none() => {
                info.video_codec = stream.codec_name;
                info.width = stream.width.unwrap_or(0);
                info.height = stream.height.unwrap_or(0);
                info.video_bitrate_kbps = kbps(stream.bit_rate.as_deref());
            }
            Some("audio") if info.audio_codec.is_none() => {
                info.audio_codec = stream.codec_name;
                info.audio_bitrate_kbps = kbps(stream.bit_rate.as_deref());
                info.audio_channels = stream.channels;
                info.audio_sample_rate = stream.sample_rate.and_then(|s| s.parse().ok());
            }
            _ => {}
        }
    }

    // Matroska rarely reports per-stream bitrates; attribute the container
    // rate minus audio to video.
    if info.video_codec.is_some() && info.video_bitrate_kbps.is_none() {
        info.video_bitrate_kbps = container_kbps
            .map(|total| total.saturating_sub(info.audio_bitrate_kbps.unwrap_or(0)))
            .filter(|v| *v > 0);
    }

    Ok(info)
}

/// Bits-per-second string to kbps.
fn kbps(bps: Option<&str>) -> Option<u32> {
    bps.and_then(|s| s.parse::<u64>().ok())
        .map(|b| (b / 1000) as u32)
        .filter(|k| *k > 0)
}

fn tags_to_metadata(tags: HashMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    tags.into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}
