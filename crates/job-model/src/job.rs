//! Export job description.
//!
//! A job is produced by the timeline editor and consumed by the export
//! engine. It is declarative: ordered clips with resolved absolute media
//! paths, an opaque effect list, and output settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level export job (`job.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Human-readable name, used as the composition id.
    #[serde(default = "default_job_name")]
    pub name: String,

    /// Clips in timeline order.
    pub clips: Vec<Clip>,

    /// Effects applied by the renderer.
    #[serde(default)]
    pub effects: Vec<Effect>,

    /// Output configuration.
    pub output: OutputSettings,
}

/// A media clip placed on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Clip identifier, unique within the job.
    pub id: String,

    /// Absolute path to the source media.
    pub source: PathBuf,

    /// Position of the clip on the output timeline.
    pub timeline_start_secs: f64,

    /// Offset into the source media where the clip starts.
    #[serde(default)]
    pub source_in_secs: f64,

    /// Clip length on the timeline.
    pub duration_secs: f64,

    /// Source dimensions, when already known by the editor.
    #[serde(default)]
    pub source_width: Option<u32>,
    #[serde(default)]
    pub source_height: Option<u32>,

    /// Source frame rate, when known.
    #[serde(default)]
    pub source_fps: Option<f64>,

    /// Whether the source carries an audio stream.
    #[serde(default = "default_true")]
    pub has_audio: bool,
}

/// An effect record. Only the renderer interprets effects; the engine reads
/// the zoom scale to size proxies and throttle parallelism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Effect kind (e.g. `zoom`, `crop`, `overlay`).
    pub kind: String,

    /// Clip the effect applies to, or the whole timeline when absent.
    #[serde(default)]
    pub clip_id: Option<String>,

    /// Effect parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Final output file.
    pub path: PathBuf,

    /// Output resolution (width x height in pixels).
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Output format.
    #[serde(default)]
    pub format: ExportFormat,

    /// Quality preset.
    #[serde(default)]
    pub quality: QualityPreset,

    /// Video bitrate in kbps (0 = derived from quality).
    #[serde(default)]
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
}

/// Output video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    #[serde(rename = "mp4-h264")]
    Mp4H264,
    #[serde(rename = "mp4-h265")]
    Mp4H265,
    Gif,
    Webm,
}

/// Encoding quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Draft,
    #[default]
    Standard,
    High,
}

impl ExportFormat {
    /// Container file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Mp4H264 | ExportFormat::Mp4H265 => "mp4",
            ExportFormat::Gif => "gif",
            ExportFormat::Webm => "webm",
        }
    }

    /// Whether chunk outputs in this format can be joined by stream copy.
    pub fn supports_concat(self) -> bool {
        !matches!(self, ExportFormat::Gif)
    }

    /// Parse a CLI-style format name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mp4-h264" | "mp4" | "h264" => Some(ExportFormat::Mp4H264),
            "mp4-h265" | "h265" | "hevc" => Some(ExportFormat::Mp4H265),
            "gif" => Some(ExportFormat::Gif),
            "webm" => Some(ExportFormat::Webm),
            _ => None,
        }
    }
}

impl QualityPreset {
    /// Constant rate factor for x264/x265.
    pub fn crf(self) -> u32 {
        match self {
            QualityPreset::Draft => 28,
            QualityPreset::Standard => 22,
            QualityPreset::High => 18,
        }
    }

    /// x264/x265 speed preset.
    pub fn encoder_preset(self) -> &'static str {
        match self {
            QualityPreset::Draft => "veryfast",
            QualityPreset::Standard => "medium",
            QualityPreset::High => "slow",
        }
    }

    /// Default video bitrate for bitrate-driven encoders, scaled by megapixels.
    pub fn video_bitrate_kbps(self, megapixels: f64) -> u32 {
        let per_megapixel = match self {
            QualityPreset::Draft => 2000.0,
            QualityPreset::Standard => 4000.0,
            QualityPreset::High => 7000.0,
        };
        (per_megapixel * megapixels.max(0.25)).round() as u32
    }
}

impl Clip {
    /// Timeline position where the clip ends.
    pub fn timeline_end_secs(&self) -> f64 {
        self.timeline_start_secs + self.duration_secs
    }

    /// Source megapixels, if the dimensions are known.
    pub fn source_megapixels(&self) -> Option<f64> {
        match (self.source_width, self.source_height) {
            (Some(w), Some(h)) => Some(w as f64 * h as f64 / 1_000_000.0),
            _ => None,
        }
    }
}

impl Effect {
    /// Zoom scale for `zoom` effects (`params.scale`, default 1.0).
    pub fn zoom_scale(&self) -> Option<f64> {
        if self.kind != "zoom" {
            return None;
        }
        Some(
            self.params
                .get("scale")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(1.0),
        )
    }
}

impl ExportJob {
    /// Load a job description from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, JobError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| JobError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| JobError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Timeline duration: the end of the last clip.
    pub fn duration_secs(&self) -> f64 {
        self.clips
            .iter()
            .map(Clip::timeline_end_secs)
            .fold(0.0, f64::max)
    }

    /// Number of output frames.
    pub fn total_frames(&self) -> u64 {
        (self.duration_secs() * self.output.fps as f64).ceil() as u64
    }

    /// Output megapixels.
    pub fn megapixels(&self) -> f64 {
        self.output.width as f64 * self.output.height as f64 / 1_000_000.0
    }

    /// Largest zoom scale across all effects (1.0 when there is no zoom).
    pub fn max_zoom_scale(&self) -> f64 {
        self.effects
            .iter()
            .filter_map(Effect::zoom_scale)
            .fold(1.0, f64::max)
    }

    /// Largest zoom scale affecting one clip (timeline-wide zooms included).
    pub fn max_zoom_scale_for(&self, clip_id: &str) -> f64 {
        self.effects
            .iter()
            .filter(|e| e.clip_id.as_deref().map_or(true, |id| id == clip_id))
            .filter_map(Effect::zoom_scale)
            .fold(1.0, f64::max)
    }

    /// Check the job shape. Does not touch the file system.
    pub fn validate(&self) -> Result<(), JobError> {
        let invalid = |message: String| Err(JobError::ValidationError { message });

        if self.clips.is_empty() {
            return invalid("job contains no clips".to_string());
        }
        if self.output.width == 0 || self.output.height == 0 {
            return invalid(format!(
                "output resolution {}x{} is empty",
                self.output.width, self.output.height
            ));
        }
        if self.output.format != ExportFormat::Gif
            && (self.output.width % 2 != 0 || self.output.height % 2 != 0)
        {
            return invalid(format!(
                "output resolution {}x{} must be even for yuv420 output",
                self.output.width, self.output.height
            ));
        }
        if self.output.fps == 0 {
            return invalid("output fps must be positive".to_string());
        }
        for clip in &self.clips {
            if !(clip.duration_secs.is_finite() && clip.duration_secs > 0.0) {
                return invalid(format!("clip {} has non-positive duration", clip.id));
            }
            if clip.timeline_start_secs < 0.0 || clip.source_in_secs < 0.0 {
                return invalid(format!("clip {} has a negative offset", clip.id));
            }
            if !clip.source.is_absolute() {
                return invalid(format!(
                    "clip {} source must be an absolute path: {}",
                    clip.id,
                    clip.source.display()
                ));
            }
        }
        if self.total_frames() == 0 {
            return invalid("job resolves to zero output frames".to_string());
        }
        Ok(())
    }

    /// Validate that all referenced source files exist.
    pub fn validate_sources(&self) -> Vec<String> {
        self.clips
            .iter()
            .filter(|clip| !clip.source.exists())
            .map(|clip| format!("Clip {} source missing: {}", clip.id, clip.source.display()))
            .collect()
    }
}

/// Errors that can occur when loading or validating a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid job: {message}")]
    ValidationError { message: String },
}

fn default_job_name() -> String {
    "export".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audio_bitrate() -> u32 {
    192
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_job() -> ExportJob {
        ExportJob {
            name: "demo".to_string(),
            clips: vec![
                Clip {
                    id: "a".to_string(),
                    source: PathBuf::from("/media/a.mp4"),
                    timeline_start_secs: 0.0,
                    source_in_secs: 0.0,
                    duration_secs: 6.0,
                    source_width: Some(3840),
                    source_height: Some(2160),
                    source_fps: Some(30.0),
                    has_audio: true,
                },
                Clip {
                    id: "b".to_string(),
                    source: PathBuf::from("/media/b.mp4"),
                    timeline_start_secs: 6.0,
                    source_in_secs: 2.0,
                    duration_secs: 4.0,
                    source_width: None,
                    source_height: None,
                    source_fps: None,
                    has_audio: false,
                },
            ],
            effects: vec![],
            output: OutputSettings {
                path: PathBuf::from("/out/demo.mp4"),
                width: 1920,
                height: 1080,
                fps: 30,
                format: ExportFormat::Mp4H264,
                quality: QualityPreset::Standard,
                video_bitrate_kbps: 0,
                audio_bitrate_kbps: 192,
            },
        }
    }

    #[test]
    fn test_duration_and_frames() {
        let job = sample_job();
        assert!((job.duration_secs() - 10.0).abs() < 1e-9);
        assert_eq!(job.total_frames(), 300);
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample_job().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_odd_resolution() {
        let mut job = sample_job();
        job.output.width = 1921;
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("even"));
    }

    #[test]
    fn test_validate_rejects_relative_source() {
        let mut job = sample_job();
        job.clips[0].source = PathBuf::from("relative.mp4");
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_job() {
        let mut job = sample_job();
        job.clips.clear();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_zoom_scale_per_clip() {
        let mut job = sample_job();
        job.effects.push(Effect {
            kind: "zoom".to_string(),
            clip_id: Some("a".to_string()),
            params: serde_json::json!({ "scale": 2.5 }),
        });
        job.effects.push(Effect {
            kind: "crop".to_string(),
            clip_id: None,
            params: serde_json::json!({ "scale": 9.0 }),
        });
        assert!((job.max_zoom_scale() - 2.5).abs() < 1e-9);
        assert!((job.max_zoom_scale_for("a") - 2.5).abs() < 1e-9);
        assert!((job.max_zoom_scale_for("b") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_job_json_defaults() {
        let json = r#"{
            "clips": [{ "id": "c", "source": "/m/c.mov", "timeline_start_secs": 0, "duration_secs": 2 }],
            "output": { "path": "/o.mp4", "width": 1280, "height": 720, "fps": 60 }
        }"#;
        let job: ExportJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.name, "export");
        assert!(job.clips[0].has_audio);
        assert_eq!(job.output.format, ExportFormat::Mp4H264);
        assert_eq!(job.output.audio_bitrate_kbps, 192);
        assert_eq!(job.total_frames(), 120);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExportJob::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, JobError::IoError { .. }));
    }
}
