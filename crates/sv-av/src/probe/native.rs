//! Parser for the native transcoder's `info` output.
//!
//! The tool prints one `Label: value` line per field, followed by an
//! optional indented metadata block:
//!
//! ```text
//! Información del archivo: /media/movie.mp4
//! Formato: mp4
//! Duración: 60.5 segundos
//! Resolución: 1280x720
//! Codec de video: h264 (1500 kbps)
//! Codec de audio: aac (128 kbps)
//! Canales de audio: 2
//! Frecuencia de muestreo: 44100 Hz
//! Metadatos:
//!   title: Movie
//! ```
//!
//! English labels are accepted too.

use std::path::Path;

use sv_core::MediaInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Format,
    Duration,
    Resolution,
    VideoCodec,
    AudioCodec,
    AudioChannels,
    SampleRate,
    Metadata,
}

fn field_for(label: &str) -> Option<Field> {
    let field = match label.to_lowercase().as_str() {
        "formato" | "format" => Field::Format,
        "duración" | "duracion" | "duration" => Field::Duration,
        "resolución" | "resolucion" | "resolution" => Field::Resolution,
        "codec de video" | "video codec" => Field::VideoCodec,
        "codec de audio" | "audio codec" => Field::AudioCodec,
        "canales de audio" | "audio channels" => Field::AudioChannels,
        "frecuencia de muestreo" | "sample rate" => Field::SampleRate,
        "metadatos" | "metadata" => Field::Metadata,
        _ => return None,
    };
    Some(field)
}

/// Parse native `info` output for `path`.
pub fn parse(path: &Path, text: &str) -> sv_core::Result<MediaInfo> {
    let mut info = MediaInfo {
        path: path.to_path_buf(),
        ..Default::default()
    };
    let mut recognized = 0usize;
    let mut in_metadata = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if in_metadata && line.starts_with(char::is_whitespace) {
            if let Some((k, v)) = line.trim().split_once(':') {
                info.metadata.insert(k.trim().to_string(), v.trim().to_string());
            }
            continue;
        }
        in_metadata = false;

        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some(field) = field_for(label.trim()) else {
            continue;
        };
        let value = value.trim();
        recognized += 1;

        match field {
            Field::Format => info.format = value.to_string(),
            Field::Duration => {
                info.duration_ms = leading_number(value)
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .map(|secs| (secs * 1000.0).round() as u64)
                    .unwrap_or(0);
            }
            Field::Resolution => {
                if let Some((w, h)) = value.split_once('x') {
                    info.width = w.trim().parse().unwrap_or(0);
                    info.height = h.trim().parse().unwrap_or(0);
                }
            }
            Field::VideoCodec => {
                let (codec, kbps) = codec_and_bitrate(value);
                info.video_codec = codec;
                info.video_bitrate_kbps = kbps;
            }
            Field::AudioCodec => {
                let (codec, kbps) = codec_and_bitrate(value);
                info.audio_codec = codec;
                info.audio_bitrate_kbps = kbps;
            }
            Field::AudioChannels => {
                info.audio_channels = leading_number(value).map(|n| n as u32).filter(|n| *n > 0);
            }
            Field::SampleRate => {
                info.audio_sample_rate = leading_number(value).map(|n| n as u32).filter(|n| *n > 0);
            }
            Field::Metadata => in_metadata = true,
        }
    }

    if recognized == 0 {
        return Err(sv_core::Error::Probe(
            "native transcoder info output contained no known fields".into(),
        ));
    }

    Ok(info)
}

/// "h264 (1500 kbps)" -> (Some("h264"), Some(1500)).
fn codec_and_bitrate(value: &str) -> (Option<String>, Option<u32>) {
    let (name, rest) = match value.split_once('(') {
        Some((name, rest)) => (name.trim(), Some(rest)),
        None => (value.trim(), None),
    };
    let codec = match name {
        "" | "none" | "ninguno" => None,
        n => Some(n.to_string()),
    };
    let kbps = rest
        .and_then(leading_number)
        .map(|n| n as u32)
        .filter(|n| *n > 0);
    (codec, kbps)
}

/// Parse the leading decimal number of `s`, ignoring trailing units.
fn leading_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Información del archivo: /media/movie.mp4\n\
Formato: mp4\n\
Duración: 60.5 segundos\n\
Resolución: 1280x720\n\
Codec de video: h264 (1500 kbps)\n\
Codec de audio: aac (128 kbps)\n\
Canales de audio: 2\n\
Frecuencia de muestreo: 44100 Hz\n\
Metadatos:\n  title: Movie: The Sequel\n  encoder: streamvio\n";

    #[test]
    fn parses_native_info() {
        let info = parse(Path::new("/media/movie.mp4"), SAMPLE).unwrap();
        assert_eq!(info.format, "mp4");
        assert_eq!(info.duration_ms, 60_500);
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.video_bitrate_kbps, Some(1500));
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.audio_bitrate_kbps, Some(128));
        assert_eq!(info.audio_channels, Some(2));
        assert_eq!(info.audio_sample_rate, Some(44100));
        assert_eq!(
            info.metadata.get("title").map(String::as_str),
            Some("Movie: The Sequel")
        );
        assert_eq!(info.metadata.len(), 2);
    }

    #[test]
    fn english_labels_and_missing_audio() {
        let text = "Format: mkv\nDuration: 12 seconds\nResolution: 640x360\nVideo codec: vp9 (0 kbps)\nAudio codec:  (0 kbps)\n";
        let info = parse(Path::new("a.mkv"), text).unwrap();
        assert_eq!(info.format, "mkv");
        assert_eq!(info.duration_ms, 12_000);
        assert_eq!(info.video_codec.as_deref(), Some("vp9"));
        assert_eq!(info.video_bitrate_kbps, None);
        assert_eq!(info.audio_codec, None);
    }

    #[test]
    fn unknown_output_is_probe_error() {
        let err = parse(Path::new("a"), "Iniciando...\nnothing here\n").unwrap_err();
        assert!(matches!(err, sv_core::Error::Probe(_)));
    }

    #[test]
    fn leading_number_ignores_units() {
        assert_eq!(leading_number("44100 Hz"), Some(44100.0));
        assert_eq!(leading_number("1500 kbps)"), Some(1500.0));
        assert_eq!(leading_number("abc"), None);
    }
}
