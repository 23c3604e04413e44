//! Source media probing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use framecast_common::error::{FramecastError, FramecastResult};

/// Properties of a source's first video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub duration_secs: Option<f64>,
}

#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> FramecastResult<MediaInfo>;
}

/// `ffprobe` subprocess prober.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> FramecastResult<MediaInfo> {
        if !path.exists() {
            return Err(FramecastError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| {
                FramecastError::proxy(format!("Failed to run {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            return Err(FramecastError::transcode(
                format!("could not probe {}", path.display()),
                String::from_utf8_lossy(&output.stderr),
            ));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| FramecastError::proxy(format!("no video stream in {}", path.display())))
    }
}

fn parse_probe_output(json: &str) -> Option<MediaInfo> {
    let parsed: ProbeOutput = serde_json::from_str(json).ok()?;
    let stream = parsed.streams.into_iter().next()?;
    let width = stream.width.filter(|w| *w > 0)?;
    let height = stream.height.filter(|h| *h > 0)?;
    Some(MediaInfo {
        width,
        height,
        fps: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
        duration_secs: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok()),
    })
}

/// Parse `30000/1001` or `25` into frames per second.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => rate.parse::<f64>().ok()?,
    };
    (fps > 0.0).then_some(fps)
}
