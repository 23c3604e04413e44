//! Chunk combiner.
//!
//! Joins chunk outputs by stream copy through a concat manifest, and falls
//! back to a full re-encode when the joined file is implausibly small.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_job_model::chunk::ChunkResult;
use framecast_job_model::job::ExportFormat;

use crate::fallback::{first_success, Attempt};
use crate::session::CancelToken;
use crate::transcoder::{base_args, Transcoder};

/// Combined output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedOutput {
    pub output_path: PathBuf,
    pub file_size: u64,
    /// Whether the stream-copy result was rejected and re-encoded.
    pub reencoded: bool,
}

pub struct ChunkCombiner {
    transcoder: Arc<dyn Transcoder>,
    /// Output smaller than this fraction of the inputs counts as corrupt.
    min_ratio: f64,
}

impl ChunkCombiner {
    pub fn new(transcoder: Arc<dyn Transcoder>, min_ratio: f64) -> Self {
        Self {
            transcoder,
            min_ratio,
        }
    }

    /// Combine successful chunks into `output` in index order.
    ///
    /// The manifest and every chunk file in `results` are deleted whatever
    /// the outcome; a failed or cancelled combine also removes `output`.
    pub async fn combine_and_cleanup(
        &self,
        results: &[ChunkResult],
        output: &Path,
        manifest_dir: &Path,
        format: ExportFormat,
        cancel: &CancelToken,
    ) -> FramecastResult<CombinedOutput> {
        let manifest = manifest_dir.join("concat_list.txt");
        let outcome = self.combine(results, output, &manifest, format, cancel).await;

        let _ = std::fs::remove_file(&manifest);
        for path in results.iter().filter_map(|r| r.path.as_ref()) {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove chunk file");
                }
            }
        }
        if outcome.is_err() {
            let _ = std::fs::remove_file(output);
        }
        outcome
    }

    async fn combine(
        &self,
        results: &[ChunkResult],
        output: &Path,
        manifest: &Path,
        format: ExportFormat,
        cancel: &CancelToken,
    ) -> FramecastResult<CombinedOutput> {
        let mut chunks: Vec<(u32, &Path)> = results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.path.as_deref().map(|p| (r.index, p)))
            .collect();
        if chunks.is_empty() {
            return Err(FramecastError::combine("no valid chunks"));
        }
        // Completion order is not rendering order.
        chunks.sort_by_key(|(index, _)| *index);

        let mut input_bytes = 0u64;
        for (index, path) in &chunks {
            let size = std::fs::metadata(path)
                .map_err(|_| {
                    FramecastError::combine(format!("chunk {index} output is missing: {}", path.display()))
                })?
                .len();
            input_bytes += size;
        }

        let paths: Vec<&Path> = chunks.iter().map(|(_, p)| *p).collect();
        std::fs::write(manifest, concat_manifest(&paths))?;
        cancel.ensure_active()?;

        tracing::info!(chunks = chunks.len(), input_bytes, output = %output.display(), "Combining chunks");

        let min_bytes = (input_bytes as f64 * self.min_ratio).ceil() as u64;
        let stream_copy = CombineAttempt {
            name: "stream-copy",
            transcoder: self.transcoder.as_ref(),
            args: stream_copy_args(manifest, output, format),
            output,
            min_bytes,
            cancel,
            attempted: AtomicBool::new(false),
        };
        let reencode = CombineAttempt {
            name: "re-encode",
            transcoder: self.transcoder.as_ref(),
            args: reencode_args(manifest, output, format),
            output,
            min_bytes,
            cancel,
            attempted: AtomicBool::new(false),
        };

        let chain: [&dyn Attempt<Output = u64>; 2] = [&stream_copy, &reencode];
        let file_size = first_success(&chain, cancel).await?;
        let reencoded = reencode.attempted.load(Ordering::SeqCst);
        tracing::info!(output = %output.display(), file_size, "Chunks combined");
        Ok(CombinedOutput {
            output_path: output.to_path_buf(),
            file_size,
            reencoded,
        })
    }
}

struct CombineAttempt<'a> {
    name: &'static str,
    transcoder: &'a dyn Transcoder,
    args: Vec<String>,
    output: &'a Path,
    min_bytes: u64,
    cancel: &'a CancelToken,
    attempted: AtomicBool,
}

#[async_trait]
impl Attempt for CombineAttempt<'_> {
    type Output = u64;

    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self) -> FramecastResult<u64> {
        self.attempted.store(true, Ordering::SeqCst);
        self.transcoder.run(self.args.clone(), self.cancel).await?;
        let size = std::fs::metadata(self.output).map(|m| m.len()).unwrap_or(0);
        if size < self.min_bytes {
            return Err(FramecastError::combine(format!(
                "{} output is {size} bytes, expected at least {}",
                self.name, self.min_bytes
            )));
        }
        Ok(size)
    }
}

/// Concat demuxer manifest: one `file '<path>'` line per input.
pub fn concat_manifest(paths: &[&Path]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", escape_manifest_path(p)))
        .collect()
}

/// Quote for the concat demuxer: `'` becomes `'\''`.
fn escape_manifest_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

fn concat_input_args(manifest: &Path) -> Vec<String> {
    let mut args = base_args();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.display().to_string(),
    ]);
    args
}

fn stream_copy_args(manifest: &Path, output: &Path, format: ExportFormat) -> Vec<String> {
    let mut args = concat_input_args(manifest);
    args.extend(["-c".to_string(), "copy".to_string()]);
    if matches!(format, ExportFormat::Mp4H264 | ExportFormat::Mp4H265) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args.push(output.display().to_string());
    args
}

/// Fixed-quality re-encode used when stream copy produced a corrupt file.
fn reencode_args(manifest: &Path, output: &Path, format: ExportFormat) -> Vec<String> {
    let mut args = concat_input_args(manifest);
    let codec: &[&str] = match format {
        ExportFormat::Webm => &[
            "-c:v", "libvpx-vp9", "-crf", "32", "-b:v", "0", "-row-mt", "1", "-c:a", "libopus",
            "-b:a", "128k",
        ],
        ExportFormat::Gif => &["-an"],
        ExportFormat::Mp4H264 | ExportFormat::Mp4H265 => &[
            "-c:v", "libx264", "-preset", "medium", "-crf", "20", "-pix_fmt", "yuv420p", "-c:a",
            "aac", "-b:a", "192k", "-movflags", "+faststart",
        ],
    };
    args.extend(codec.iter().map(|s| s.to_string()));
    args.push(output.display().to_string());
    args
}
