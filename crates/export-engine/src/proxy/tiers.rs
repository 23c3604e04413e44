//! Proxy transcode tiers.
//!
//! Hardware paths are fast but fail on some codec/driver combinations, so
//! each request tries hardware decode + encode, then software decode with
//! hardware encode, then pure software.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use framecast_common::error::{FramecastError, FramecastResult};

use crate::fallback::Attempt;
use crate::hardware::HardwareEncoder;
use crate::session::CancelToken;
use crate::transcoder::{base_args, Transcoder};

use super::preset::ResolvedProxySettings;

/// How the proxy frame size is expressed to the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleTarget {
    /// Source size known: exact even dimensions.
    Exact(u32, u32),
    /// Source size unknown: let the scaler fit into the box.
    Fit(u32, u32),
}

impl ScaleTarget {
    fn filter(self) -> String {
        match self {
            ScaleTarget::Exact(w, h) => format!("scale={w}:{h}:flags=lanczos"),
            ScaleTarget::Fit(w, h) => format!(
                "scale=w='min({w},iw)':h='min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2:flags=lanczos"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyTier {
    /// Hardware decode, frame download, software scale, hardware encode.
    HardwareDecode(HardwareEncoder),
    /// Software decode and scale, hardware encode.
    HardwareEncode(HardwareEncoder),
    Software,
}

impl ProxyTier {
    pub fn name(self) -> &'static str {
        match self {
            ProxyTier::HardwareDecode(_) => "hardware-decode",
            ProxyTier::HardwareEncode(_) => "hardware-encode",
            ProxyTier::Software => "software",
        }
    }

    /// Transcoder arguments for this tier.
    pub fn args(
        self,
        input: &Path,
        output: &Path,
        settings: &ResolvedProxySettings,
        scale: ScaleTarget,
    ) -> Vec<String> {
        let mut args = base_args();
        let mut filters: Vec<String> = Vec::new();

        match self {
            ProxyTier::HardwareDecode(hw) => {
                args.extend(hw.device_args());
                args.extend([
                    "-hwaccel".to_string(),
                    hw.hwaccel().to_string(),
                    "-hwaccel_output_format".to_string(),
                    hw.hwaccel_output_format().to_string(),
                ]);
                filters.push("hwdownload".to_string());
                filters.push("format=nv12".to_string());
            }
            ProxyTier::HardwareEncode(hw) => args.extend(hw.device_args()),
            ProxyTier::Software => {}
        }

        args.push("-i".to_string());
        args.push(input.display().to_string());

        filters.push(scale.filter());
        if let Some(fps) = settings.fps {
            filters.push(format!("fps={fps}"));
        }

        match self {
            ProxyTier::HardwareDecode(hw) | ProxyTier::HardwareEncode(hw) => {
                if let Some(upload) = hw.upload_filter() {
                    filters.push(upload.to_string());
                } else if matches!(self, ProxyTier::HardwareEncode(_)) {
                    filters.push("format=nv12".to_string());
                }
                args.push("-vf".to_string());
                args.push(filters.join(","));
                args.extend(hw.encode_args(settings.bitrate_kbps));
            }
            ProxyTier::Software => {
                filters.push("format=yuv420p".to_string());
                args.push("-vf".to_string());
                args.push(filters.join(","));
                args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-preset".to_string(),
                    settings.encoder_preset.clone(),
                    "-crf".to_string(),
                    settings.crf.to_string(),
                    "-maxrate".to_string(),
                    format!("{}k", settings.bitrate_kbps),
                    "-bufsize".to_string(),
                    format!("{}k", settings.bitrate_kbps * 2),
                ]);
            }
        }

        if let Some(gop) = settings.keyframe_interval {
            args.extend([
                "-g".to_string(),
                gop.to_string(),
                "-keyint_min".to_string(),
                gop.to_string(),
            ]);
        }

        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        if settings.keep_audio {
            args.extend([
                "-map".to_string(),
                "0:a:0?".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                "128k".to_string(),
            ]);
        } else {
            args.push("-an".to_string());
        }

        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.display().to_string(),
        ]);
        args
    }
}

/// Tiers to try, in order. Hardware tiers need a detected encoder.
pub fn tiers_for(encoder: Option<HardwareEncoder>) -> Vec<ProxyTier> {
    match encoder {
        Some(hw) => vec![
            ProxyTier::HardwareDecode(hw),
            ProxyTier::HardwareEncode(hw),
            ProxyTier::Software,
        ],
        None => vec![ProxyTier::Software],
    }
}

/// One tier as a fallback-chain attempt. Succeeds with the output size.
pub(crate) struct TierAttempt<'a> {
    pub tier: ProxyTier,
    pub transcoder: &'a dyn Transcoder,
    pub args: Vec<String>,
    pub output: PathBuf,
    pub min_valid_bytes: u64,
    pub cancel: &'a CancelToken,
}

#[async_trait]
impl Attempt for TierAttempt<'_> {
    type Output = u64;

    fn name(&self) -> &str {
        self.tier.name()
    }

    async fn attempt(&self) -> FramecastResult<u64> {
        let _ = std::fs::remove_file(&self.output);
        let result = self.transcoder.run(self.args.clone(), self.cancel).await;
        if let Err(e) = result {
            let _ = std::fs::remove_file(&self.output);
            return Err(e);
        }

        let size = std::fs::metadata(&self.output).map(|m| m.len()).unwrap_or(0);
        if size < self.min_valid_bytes {
            let _ = std::fs::remove_file(&self.output);
            return Err(FramecastError::proxy(format!(
                "{} tier produced {size} bytes, expected at least {}",
                self.tier.name(),
                self.min_valid_bytes
            )));
        }
        Ok(size)
    }
}
