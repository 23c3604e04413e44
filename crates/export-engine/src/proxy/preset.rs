//! Proxy kinds, their presets, and caller overrides.

use serde::{Deserialize, Serialize};

/// Purpose of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// Editor playback.
    Preview,
    /// Decode-bounded stand-in used while exporting.
    Export,
    /// Small blurred background source.
    Glow,
    /// All-intra low resolution copy for timeline scrubbing.
    Scrub,
}

impl ProxyKind {
    pub const ALL: [ProxyKind; 4] = [
        ProxyKind::Preview,
        ProxyKind::Export,
        ProxyKind::Glow,
        ProxyKind::Scrub,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Preview => "preview",
            ProxyKind::Export => "export",
            ProxyKind::Glow => "glow",
            ProxyKind::Scrub => "scrub",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn preset(self) -> &'static ProxyPreset {
        match self {
            ProxyKind::Preview => &ProxyPreset::PREVIEW,
            ProxyKind::Export => &ProxyPreset::EXPORT,
            ProxyKind::Glow => &ProxyPreset::GLOW,
            ProxyKind::Scrub => &ProxyPreset::SCRUB,
        }
    }
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults of one proxy kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPreset {
    pub kind: ProxyKind,
    /// Bounding box the proxy is scaled into.
    pub max_width: u32,
    pub max_height: u32,
    pub bitrate_kbps: u32,
    /// x264 speed preset for the software tier.
    pub encoder_preset: &'static str,
    pub crf: u32,
    /// Output frame rate; `None` keeps the source rate.
    pub fps: Option<u32>,
    /// Cached files smaller than this are treated as corrupt.
    pub min_valid_bytes: u64,
    /// Sources narrower than this get no proxy at all.
    pub skip_below_width: Option<u32>,
    /// Keyframe interval in frames; `Some(1)` is all-intra.
    pub keyframe_interval: Option<u32>,
    pub keep_audio: bool,
}

impl ProxyPreset {
    pub const PREVIEW: ProxyPreset = ProxyPreset {
        kind: ProxyKind::Preview,
        max_width: 1280,
        max_height: 720,
        bitrate_kbps: 2_500,
        encoder_preset: "veryfast",
        crf: 28,
        fps: None,
        min_valid_bytes: 10 * 1024,
        skip_below_width: None,
        keyframe_interval: None,
        keep_audio: true,
    };

    pub const EXPORT: ProxyPreset = ProxyPreset {
        kind: ProxyKind::Export,
        max_width: 3840,
        max_height: 2160,
        bitrate_kbps: 20_000,
        encoder_preset: "fast",
        crf: 18,
        fps: None,
        min_valid_bytes: 100 * 1024,
        skip_below_width: None,
        keyframe_interval: None,
        keep_audio: true,
    };

    pub const GLOW: ProxyPreset = ProxyPreset {
        kind: ProxyKind::Glow,
        max_width: 640,
        max_height: 360,
        bitrate_kbps: 800,
        encoder_preset: "ultrafast",
        crf: 32,
        fps: Some(30),
        min_valid_bytes: 5 * 1024,
        skip_below_width: Some(640),
        keyframe_interval: None,
        keep_audio: false,
    };

    pub const SCRUB: ProxyPreset = ProxyPreset {
        kind: ProxyKind::Scrub,
        max_width: 480,
        max_height: 270,
        bitrate_kbps: 600,
        encoder_preset: "ultrafast",
        crf: 30,
        fps: Some(15),
        min_valid_bytes: 5 * 1024,
        skip_below_width: None,
        keyframe_interval: Some(1),
        keep_audio: false,
    };
}

/// Per-call overrides of a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub encoder_preset: Option<String>,
    pub fps: Option<u32>,
}

/// A proxy request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyOptions {
    pub kind: ProxyKind,
    #[serde(default)]
    pub overrides: ProxyOverrides,
    /// Source dimensions, when the caller already knows them.
    #[serde(default)]
    pub source_width: Option<u32>,
    #[serde(default)]
    pub source_height: Option<u32>,
}

/// Effective settings after applying overrides to a preset.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProxySettings {
    pub kind: ProxyKind,
    pub max_width: u32,
    pub max_height: u32,
    pub bitrate_kbps: u32,
    pub encoder_preset: String,
    pub crf: u32,
    pub fps: Option<u32>,
    pub min_valid_bytes: u64,
    pub skip_below_width: Option<u32>,
    pub keyframe_interval: Option<u32>,
    pub keep_audio: bool,
}

impl ProxyOptions {
    pub fn new(kind: ProxyKind) -> Self {
        Self {
            kind,
            overrides: ProxyOverrides::default(),
            source_width: None,
            source_height: None,
        }
    }

    pub fn with_overrides(mut self, overrides: ProxyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_source_size(mut self, width: u32, height: u32) -> Self {
        self.source_width = Some(width);
        self.source_height = Some(height);
        self
    }

    pub fn resolve(&self) -> ResolvedProxySettings {
        let preset = self.kind.preset();
        let o = &self.overrides;
        ResolvedProxySettings {
            kind: self.kind,
            max_width: o.width.unwrap_or(preset.max_width),
            max_height: o.height.unwrap_or(preset.max_height),
            bitrate_kbps: o.bitrate_kbps.unwrap_or(preset.bitrate_kbps),
            encoder_preset: o
                .encoder_preset
                .clone()
                .unwrap_or_else(|| preset.encoder_preset.to_string()),
            crf: preset.crf,
            fps: o.fps.or(preset.fps),
            min_valid_bytes: preset.min_valid_bytes,
            skip_below_width: preset.skip_below_width,
            keyframe_interval: preset.keyframe_interval,
            keep_audio: preset.keep_audio,
        }
    }
}

/// Fit `source` into the `max` box, preserving aspect ratio, never
/// upscaling, and keeping both sides even.
pub fn fit_dimensions(source: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let scale = (max.0 as f64 / sw).min(max.1 as f64 / sh).min(1.0);
    let even = |v: f64| (((v.floor() as u32) / 2) * 2).max(2);
    (even(sw * scale), even(sh * scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_defaults() {
        let options = ProxyOptions::new(ProxyKind::Export).with_overrides(ProxyOverrides {
            width: Some(2560),
            height: Some(1440),
            encoder_preset: Some("slow".to_string()),
            ..Default::default()
        });
        let resolved = options.resolve();
        assert_eq!((resolved.max_width, resolved.max_height), (2560, 1440));
        assert_eq!(resolved.encoder_preset, "slow");
        assert_eq!(resolved.bitrate_kbps, ProxyPreset::EXPORT.bitrate_kbps);
    }

    #[test]
    fn test_fit_preserves_aspect_and_parity() {
        assert_eq!(fit_dimensions((3840, 2160), (1280, 720)), (1280, 720));
        assert_eq!(fit_dimensions((1080, 1920), (1280, 720)), (404, 720));
        assert_eq!(fit_dimensions((640, 360), (1280, 720)), (640, 360));
        assert_eq!(fit_dimensions((1001, 1001), (3840, 2160)), (1000, 1000));
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ProxyKind::ALL {
            assert_eq!(ProxyKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProxyKind::parse("thumbnail"), None);
    }
}
