//! Reference renderer worker.
//!
//! Composites the clips of one chunk's time window onto a black canvas with
//! ffmpeg and reports progress and results over the worker protocol. The
//! `framecast render-chunk` subcommand runs [`run_worker`] on stdin/stdout.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_job_model::chunk::ChunkResult;
use framecast_job_model::job::ExportFormat;
use framecast_job_model::progress::ExportStage;
use framecast_job_model::protocol::{ChunkAssignment, ChunkProgress, WorkerInit, WorkerMessage};
use framecast_job_model::worker_config::ExportJobConfig;

use crate::codec::{codec_args, gif_palette_filter};
use crate::session::CancelToken;
use crate::transcoder::{base_args, FfmpegTranscoder};

const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// A clip's contribution to one chunk, in chunk-relative time.
#[derive(Debug, Clone, PartialEq)]
struct ClipWindow<'a> {
    source: &'a std::path::Path,
    seek_secs: f64,
    offset_secs: f64,
    duration_secs: f64,
    has_audio: bool,
}

fn clip_windows<'a>(config: &'a ExportJobConfig, assignment: &ChunkAssignment) -> Vec<ClipWindow<'a>> {
    let fps = config.composition.fps;
    let window_start = assignment.chunk.start_secs(fps);
    let window_end = window_start + assignment.chunk.duration_secs(fps);

    config
        .input_props
        .clips
        .iter()
        .filter_map(|clip| {
            let start = clip.timeline_start_secs.max(window_start);
            let end = clip.timeline_end_secs().min(window_end);
            if end - start <= 1e-6 {
                return None;
            }
            Some(ClipWindow {
                source: &clip.source,
                seek_secs: clip.source_in_secs + (start - clip.timeline_start_secs),
                offset_secs: start - window_start,
                duration_secs: end - start,
                has_audio: clip.has_audio,
            })
        })
        .collect()
}

/// ffmpeg arguments rendering one chunk to its assigned output.
pub fn build_chunk_args(config: &ExportJobConfig, assignment: &ChunkAssignment) -> Vec<String> {
    let meta = &config.composition;
    let fps = meta.fps.max(1);
    let duration = assignment.chunk.duration_secs(fps);
    let is_gif = config.codec.format == ExportFormat::Gif;
    let windows = clip_windows(config, assignment);

    let mut args = base_args();
    args.extend([
        "-f".to_string(),
        "lavfi".to_string(),
        "-t".to_string(),
        format!("{duration:.6}"),
        "-i".to_string(),
        format!("color=c=black:s={}x{}:r={fps}", meta.width, meta.height),
    ]);
    if !is_gif {
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-t".to_string(),
            format!("{duration:.6}"),
            "-i".to_string(),
            format!("anullsrc=r={AUDIO_SAMPLE_RATE}:cl=stereo"),
        ]);
    }

    let first_clip_input = if is_gif { 1 } else { 2 };
    for window in &windows {
        args.extend([
            "-ss".to_string(),
            format!("{:.6}", window.seek_secs),
            "-t".to_string(),
            format!("{:.6}", window.duration_secs),
            "-i".to_string(),
            window.source.display().to_string(),
        ]);
    }

    let mut filters = Vec::new();
    let mut video_label = "0:v".to_string();
    let mut audio_labels = Vec::new();
    for (position, window) in windows.iter().enumerate() {
        let input = first_clip_input + position;
        let start = window.offset_secs;
        let end = start + window.duration_secs;
        filters.push(format!(
            "[{input}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},setpts=PTS-STARTPTS+{start:.6}/TB[clip{position}]",
            w = meta.width,
            h = meta.height,
        ));
        filters.push(format!(
            "[{video_label}][clip{position}]overlay=eof_action=pass:enable='between(t,{start:.6},{end:.6})'[layer{position}]"
        ));
        video_label = format!("layer{position}");

        if !is_gif && window.has_audio {
            let delay_ms = (start * 1000.0).round() as u64;
            filters.push(format!(
                "[{input}:a]aresample={AUDIO_SAMPLE_RATE},adelay={delay_ms}|{delay_ms}[aclip{position}]"
            ));
            audio_labels.push(format!("[aclip{position}]"));
        }
    }

    if is_gif {
        filters.push(gif_palette_filter(&video_label, "vout"));
    } else {
        filters.push(format!("[{video_label}]format=yuv420p[vout]"));
        if !audio_labels.is_empty() {
            filters.push(format!(
                "[1:a]{}amix=inputs={}:duration=first:dropout_transition=0[aout]",
                audio_labels.concat(),
                audio_labels.len() + 1
            ));
        }
    }

    args.push("-filter_complex".to_string());
    args.push(filters.join(";"));
    args.push("-map".to_string());
    args.push("[vout]".to_string());
    if !is_gif {
        args.push("-map".to_string());
        args.push(if audio_labels.is_empty() { "1:a".to_string() } else { "[aout]".to_string() });
        args.push("-frames:v".to_string());
        args.push(assignment.chunk.frame_count.to_string());
    }
    args.push("-t".to_string());
    args.push(format!("{duration:.6}"));
    args.extend(codec_args(&config.codec, config.concurrency));
    args.push("-progress".to_string());
    args.push("pipe:1".to_string());
    args.push(assignment.output_path.display().to_string());
    args
}

/// Run one worker: read a [`WorkerInit`] line, render every assignment in
/// order, and write protocol lines to `output`.
///
/// A chunk that fails is reported and the next one is attempted. Returns the
/// number of failed chunks. Cancellation stops without reporting.
pub async fn run_worker<R, W>(
    input: R,
    output: W,
    transcoder: &FfmpegTranscoder,
    cancel: &CancelToken,
) -> FramecastResult<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut line = String::new();
    BufReader::new(input).read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Err(FramecastError::config("renderer received no init message"));
    }
    let init: WorkerInit = serde_json::from_str(line.trim())?;
    tracing::info!(
        worker = init.worker_index,
        chunks = init.assignments.len(),
        "Renderer worker starting"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(message) = rx.recv().await {
            let Ok(mut line) = message.to_line() else {
                continue;
            };
            line.push('\n');
            if output.write_all(line.as_bytes()).await.is_err() || output.flush().await.is_err() {
                break;
            }
        }
        output
    });

    let outcome = render_assignments(&init, transcoder, cancel, &tx).await;
    drop(tx);
    if writer.await.is_err() {
        tracing::warn!("Renderer output writer stopped unexpectedly");
    }
    outcome
}

async fn render_assignments(
    init: &WorkerInit,
    transcoder: &FfmpegTranscoder,
    cancel: &CancelToken,
    tx: &mpsc::UnboundedSender<WorkerMessage>,
) -> FramecastResult<usize> {
    let fps = init.config.composition.fps.max(1) as f64;
    let is_gif = init.config.codec.format == ExportFormat::Gif;
    let mut failed = 0;

    for assignment in &init.assignments {
        cancel.ensure_active()?;
        let chunk = assignment.chunk;
        let args = build_chunk_args(&init.config, assignment);

        let progress_tx = tx.clone();
        let mut on_progress = move |p: crate::transcoder::TranscodeProgress| {
            let rendered = if is_gif {
                (p.out_time_secs * fps).round() as u64
            } else {
                p.frame
            };
            let _ = progress_tx.send(WorkerMessage::Progress(ChunkProgress {
                chunk_index: chunk.index,
                rendered_frames: rendered.min(chunk.frame_count),
                total_frames: chunk.frame_count,
                stage: ExportStage::Rendering,
            }));
        };

        let result = match transcoder.run_with_progress(args, cancel, &mut on_progress).await {
            Ok(_) if assignment.output_path.exists() => {
                tracing::debug!(chunk = chunk.index, "Chunk rendered");
                ChunkResult::ok(chunk.index, &assignment.output_path)
            }
            Ok(_) => ChunkResult::failed(chunk.index, "encoder produced no output"),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                if let Some(stderr) = e.stderr() {
                    tracing::error!(chunk = chunk.index, stderr, "Chunk render failed");
                }
                ChunkResult::failed(chunk.index, e.to_string())
            }
        };
        if !result.success {
            failed += 1;
        }
        let _ = tx.send(WorkerMessage::Result(result));
    }
    Ok(failed)
}
