//! Configuration handed to every renderer worker.

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkPlan;
use crate::job::{Clip, Effect, ExportFormat, ExportJob, QualityPreset};

/// Immutable description passed to every worker: enough shared context to
/// render an arbitrary sub-range of the composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJobConfig {
    /// Render target reference.
    pub composition_id: String,

    /// Composition shape.
    pub composition: CompositionMeta,

    /// Resolved inputs, with proxy-substituted media paths.
    pub input_props: InputProps,

    /// Codec and quality settings.
    pub codec: CodecSettings,

    /// Per-worker concurrency hint (encoder threads).
    pub concurrency: u32,

    /// Per-chunk timeout hint in milliseconds.
    pub timeout_ms: u64,

    /// Renderer video cache budget in bytes.
    pub video_cache_size_bytes: u64,

    /// Full chunk plan of the export.
    pub chunk_plan: ChunkPlan,
}

/// Composition metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositionMeta {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub total_frames: u64,
    pub duration_secs: f64,
}

/// Inputs the renderer composites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputProps {
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

/// Codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSettings {
    pub format: ExportFormat,
    pub quality: QualityPreset,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl CompositionMeta {
    /// Composition shape of a job.
    pub fn from_job(job: &ExportJob) -> Self {
        Self {
            width: job.output.width,
            height: job.output.height,
            fps: job.output.fps,
            total_frames: job.total_frames(),
            duration_secs: job.duration_secs(),
        }
    }

    pub fn megapixels(&self) -> f64 {
        self.width as f64 * self.height as f64 / 1_000_000.0
    }
}

impl CodecSettings {
    /// Codec settings of a job, resolving an automatic bitrate.
    pub fn from_job(job: &ExportJob) -> Self {
        let video_bitrate_kbps = if job.output.video_bitrate_kbps == 0 {
            job.output.quality.video_bitrate_kbps(job.megapixels())
        } else {
            job.output.video_bitrate_kbps
        };
        Self {
            format: job.output.format,
            quality: job.output.quality,
            video_bitrate_kbps,
            audio_bitrate_kbps: job.output.audio_bitrate_kbps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::sample_job;

    #[test]
    fn test_codec_settings_resolve_auto_bitrate() {
        let job = sample_job();
        let codec = CodecSettings::from_job(&job);
        assert!(codec.video_bitrate_kbps > 0);

        let mut fixed = sample_job();
        fixed.output.video_bitrate_kbps = 12_000;
        assert_eq!(CodecSettings::from_job(&fixed).video_bitrate_kbps, 12_000);
    }

    #[test]
    fn test_composition_from_job() {
        let meta = CompositionMeta::from_job(&sample_job());
        assert_eq!(meta.total_frames, 300);
        assert!((meta.megapixels() - 2.0736).abs() < 1e-6);
    }
}
