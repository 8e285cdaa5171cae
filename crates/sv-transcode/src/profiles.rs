//! Built-in transcoding profiles and the device-based selection heuristic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MOBILE_LOW: &str = "mobile-low";
pub const MOBILE_HIGH: &str = "mobile-high";
pub const STANDARD: &str = "standard";
pub const HIGH: &str = "high";
pub const ULTRA: &str = "ultra";

/// An immutable catalog entry describing one encode target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub video_codec: String,
    pub audio_codec: String,
    /// Container format, also the output file extension.
    pub container: String,
}

impl TranscodeProfile {
    fn builtin(name: &str, width: u32, height: u32, video_kbps: u32, audio_kbps: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            video_bitrate_kbps: video_kbps,
            audio_bitrate_kbps: audio_kbps,
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            container: "mp4".into(),
        }
    }

    /// `WxH`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Apply per-job overrides. Unset fields keep the catalog value.
    #[must_use]
    pub fn with_overrides(&self, overrides: &ProfileOverrides) -> Self {
        let mut p = self.clone();
        if let Some(w) = overrides.width {
            p.width = w;
        }
        if let Some(h) = overrides.height {
            p.height = h;
        }
        if let Some(v) = overrides.video_bitrate_kbps {
            p.video_bitrate_kbps = v;
        }
        if let Some(a) = overrides.audio_bitrate_kbps {
            p.audio_bitrate_kbps = a;
        }
        if let Some(ref c) = overrides.video_codec {
            p.video_codec = c.clone();
        }
        if let Some(ref c) = overrides.audio_codec {
            p.audio_codec = c.clone();
        }
        if let Some(ref c) = overrides.container {
            p.container = c.clone();
        }
        p
    }

    /// Clamp the video bitrate to `ceiling_kbps`. A ceiling of 0 is no limit.
    #[must_use]
    pub fn capped(mut self, ceiling_kbps: u32) -> Self {
        if ceiling_kbps > 0 && self.video_bitrate_kbps > ceiling_kbps {
            tracing::debug!(
                profile = %self.name,
                requested = self.video_bitrate_kbps,
                ceiling = ceiling_kbps,
                "clamping video bitrate"
            );
            self.video_bitrate_kbps = ceiling_kbps;
        }
        self
    }
}

/// Per-job adjustments on top of a catalog profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
}

impl ProfileOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The fixed set of named profiles.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: Vec<TranscodeProfile>,
}

/// Position of `standard` in the built-in list.
const STANDARD_INDEX: usize = 2;

impl ProfileCatalog {
    pub fn builtin() -> Self {
        let profiles = vec![
            TranscodeProfile::builtin(MOBILE_LOW, 640, 360, 600, 64),
            TranscodeProfile::builtin(MOBILE_HIGH, 854, 480, 1500, 96),
            TranscodeProfile::builtin(STANDARD, 1280, 720, 3000, 128),
            TranscodeProfile::builtin(HIGH, 1920, 1080, 6000, 192),
            TranscodeProfile::builtin(ULTRA, 3840, 2160, 16000, 256),
        ];
        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Option<&TranscodeProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Look up a profile by name. Unknown names resolve to `standard`.
    pub fn lookup(&self, name: &str) -> &TranscodeProfile {
        match self.get(name) {
            Some(p) => p,
            None => {
                tracing::debug!(requested = name, "unknown profile; using {STANDARD}");
                &self.profiles[STANDARD_INDEX]
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranscodeProfile> {
        self.profiles.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Network type reported by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[serde(rename = "2g")]
    Cellular2g,
    #[serde(rename = "3g")]
    Cellular3g,
    #[serde(rename = "4g")]
    Cellular4g,
    Wifi,
    Ethernet,
    #[default]
    Unknown,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cellular2g => write!(f, "2g"),
            Self::Cellular3g => write!(f, "3g"),
            Self::Cellular4g => write!(f, "4g"),
            Self::Wifi => write!(f, "wifi"),
            Self::Ethernet => write!(f, "ethernet"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "2g" | "slow-2g" => Ok(Self::Cellular2g),
            "3g" => Ok(Self::Cellular3g),
            "4g" | "lte" => Ok(Self::Cellular4g),
            "wifi" => Ok(Self::Wifi),
            "ethernet" => Ok(Self::Ethernet),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown connection type: {other}")),
        }
    }
}

/// What is known about the playback device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceHints {
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub connection_type: ConnectionType,
    /// Measured bandwidth. `None` when the client did not report one.
    pub bandwidth_kbps: Option<u32>,
}

/// Pick the best profile name for a device.
///
/// Rules are checked top-down and the first match wins. Without a bandwidth
/// figure every bandwidth rule is skipped. The result is always a name in
/// [`ProfileCatalog::builtin`].
pub fn select_optimal(hints: &DeviceHints) -> &'static str {
    let bw = hints.bandwidth_kbps;
    let bw_below = |limit: u32| bw.is_some_and(|b| b < limit);
    let bw_at_least = |limit: u32| bw.is_some_and(|b| b >= limit);
    let fast_link = matches!(
        hints.connection_type,
        ConnectionType::Cellular4g | ConnectionType::Wifi
    );

    if hints.is_mobile && bw_below(1500) {
        MOBILE_LOW
    } else if (hints.is_mobile || hints.is_tablet)
        && ((bw_at_least(1500) && bw_below(5000)) || fast_link)
    {
        MOBILE_HIGH
    } else if !hints.is_mobile && bw_at_least(20_000) {
        ULTRA
    } else if !hints.is_mobile && bw_at_least(10_000) {
        HIGH
    } else {
        // Desktop on wifi and every remaining case.
        STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(mobile: bool, tablet: bool, conn: ConnectionType, bw: Option<u32>) -> DeviceHints {
        DeviceHints {
            is_mobile: mobile,
            is_tablet: tablet,
            connection_type: conn,
            bandwidth_kbps: bw,
        }
    }

    #[test]
    fn builtin_catalog_values() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(
            catalog.names(),
            vec![MOBILE_LOW, MOBILE_HIGH, STANDARD, HIGH, ULTRA]
        );
        let high = catalog.get(HIGH).unwrap();
        assert_eq!((high.width, high.height), (1920, 1080));
        assert_eq!(high.video_bitrate_kbps, 6000);
        assert_eq!(high.audio_bitrate_kbps, 192);
        assert!(catalog
            .iter()
            .all(|p| p.video_codec == "h264" && p.audio_codec == "aac" && p.container == "mp4"));
    }

    #[test]
    fn unknown_profile_falls_back_to_standard() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(catalog.lookup("imax").name, STANDARD);
        assert_eq!(catalog.lookup(ULTRA).name, ULTRA);
    }

    #[test]
    fn overrides_and_ceiling() {
        let catalog = ProfileCatalog::builtin();
        let overrides = ProfileOverrides {
            width: Some(1000),
            video_bitrate_kbps: Some(20_000),
            ..Default::default()
        };
        let p = catalog.lookup(STANDARD).with_overrides(&overrides).capped(8000);
        assert_eq!(p.width, 1000);
        assert_eq!(p.height, 720);
        assert_eq!(p.video_bitrate_kbps, 8000);

        let uncapped = catalog.lookup(ULTRA).clone().capped(0);
        assert_eq!(uncapped.video_bitrate_kbps, 16000);
        assert!(ProfileOverrides::default().is_empty());
    }

    #[test]
    fn decision_table() {
        use ConnectionType::*;
        let cases = [
            (hints(true, false, Cellular3g, Some(800)), MOBILE_LOW),
            (hints(true, false, Cellular3g, Some(2000)), MOBILE_HIGH),
            (hints(true, false, Cellular4g, None), MOBILE_HIGH),
            (hints(false, true, Wifi, Some(30_000)), MOBILE_HIGH),
            (hints(false, true, Cellular3g, Some(30_000)), ULTRA),
            (hints(false, false, Ethernet, Some(25_000)), ULTRA),
            (hints(false, false, Ethernet, Some(12_000)), HIGH),
            (hints(false, false, Wifi, Some(8000)), STANDARD),
            (hints(false, false, Unknown, None), STANDARD),
            (hints(true, false, Cellular3g, None), STANDARD),
            (hints(true, false, Cellular3g, Some(9000)), STANDARD),
        ];
        for (h, expected) in cases {
            assert_eq!(select_optimal(&h), expected, "{h:?}");
        }
    }

    #[test]
    fn selection_always_names_a_catalog_entry() {
        use ConnectionType::*;
        let catalog = ProfileCatalog::builtin();
        for mobile in [false, true] {
            for tablet in [false, true] {
                for conn in [Cellular2g, Cellular3g, Cellular4g, Wifi, Ethernet, Unknown] {
                    for bw in [None, Some(0), Some(1499), Some(1500), Some(4999), Some(5000), Some(10_000), Some(20_000)] {
                        let name = select_optimal(&hints(mobile, tablet, conn, bw));
                        assert!(catalog.get(name).is_some());
                    }
                }
            }
        }
    }

    #[test]
    fn connection_type_parsing() {
        assert_eq!("4G".parse::<ConnectionType>().unwrap(), ConnectionType::Cellular4g);
        assert_eq!("wifi".parse::<ConnectionType>().unwrap(), ConnectionType::Wifi);
        assert!("carrier-pigeon".parse::<ConnectionType>().is_err());
        assert_eq!(ConnectionType::Cellular2g.to_string(), "2g");
    }
}
