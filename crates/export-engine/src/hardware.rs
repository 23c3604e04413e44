//! Hardware encoder detection.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A hardware H.264 encoder exposed by the transcoding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareEncoder {
    VideoToolbox,
    Nvenc,
    Qsv,
    Vaapi,
}

/// Default VA-API render node.
const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

impl HardwareEncoder {
    /// Encoder name as listed by `ffmpeg -encoders`.
    pub fn encoder_name(self) -> &'static str {
        match self {
            HardwareEncoder::VideoToolbox => "h264_videotoolbox",
            HardwareEncoder::Nvenc => "h264_nvenc",
            HardwareEncoder::Qsv => "h264_qsv",
            HardwareEncoder::Vaapi => "h264_vaapi",
        }
    }

    /// Matching `-hwaccel` decoder.
    pub fn hwaccel(self) -> &'static str {
        match self {
            HardwareEncoder::VideoToolbox => "videotoolbox",
            HardwareEncoder::Nvenc => "cuda",
            HardwareEncoder::Qsv => "qsv",
            HardwareEncoder::Vaapi => "vaapi",
        }
    }

    /// Pixel format of hardware-decoded frames.
    pub fn hwaccel_output_format(self) -> &'static str {
        match self {
            HardwareEncoder::VideoToolbox => "videotoolbox_vld",
            HardwareEncoder::Nvenc => "cuda",
            HardwareEncoder::Qsv => "qsv",
            HardwareEncoder::Vaapi => "vaapi",
        }
    }

    /// Global arguments required before the inputs.
    pub fn device_args(self) -> Vec<String> {
        match self {
            HardwareEncoder::Vaapi => vec!["-vaapi_device".to_string(), VAAPI_DEVICE.to_string()],
            _ => Vec::new(),
        }
    }

    /// Filter suffix that moves software frames back to the encoder.
    pub fn upload_filter(self) -> Option<&'static str> {
        match self {
            HardwareEncoder::Vaapi => Some("format=nv12,hwupload"),
            _ => None,
        }
    }

    /// Encoder arguments at a target bitrate.
    pub fn encode_args(self, bitrate_kbps: u32) -> Vec<String> {
        let bitrate = format!("{}k", bitrate_kbps.max(500));
        let mut args = vec!["-c:v".to_string(), self.encoder_name().to_string()];
        match self {
            HardwareEncoder::VideoToolbox => {
                args.extend(["-b:v".to_string(), bitrate, "-allow_sw".to_string(), "1".to_string()]);
            }
            HardwareEncoder::Nvenc => {
                args.extend([
                    "-preset".to_string(),
                    "p4".to_string(),
                    "-rc".to_string(),
                    "vbr".to_string(),
                    "-b:v".to_string(),
                    bitrate,
                ]);
            }
            HardwareEncoder::Qsv | HardwareEncoder::Vaapi => {
                args.extend(["-b:v".to_string(), bitrate]);
            }
        }
        args
    }

    /// Candidates in preference order for the current platform.
    fn candidates() -> &'static [HardwareEncoder] {
        if cfg!(target_os = "macos") {
            &[HardwareEncoder::VideoToolbox]
        } else {
            &[HardwareEncoder::Nvenc, HardwareEncoder::Qsv, HardwareEncoder::Vaapi]
        }
    }
}

/// Pick the best hardware encoder from `ffmpeg -encoders` output.
pub fn parse_encoder_list(listing: &str) -> Option<HardwareEncoder> {
    HardwareEncoder::candidates().iter().copied().find(|encoder| {
        listing
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(encoder.encoder_name()))
    })
}

/// Ask the transcoding engine which hardware encoders it was built with.
///
/// Presence in the list does not guarantee the device works; proxy
/// generation falls back to software when a hardware tier fails.
pub async fn detect_hardware_encoder(ffmpeg: &Path) -> Option<HardwareEncoder> {
    let output = tokio::process::Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let listing = String::from_utf8_lossy(&output.stdout);
    let encoder = parse_encoder_list(&listing);
    tracing::debug!(encoder = ?encoder, "Hardware encoder detection finished");
    encoder
}
