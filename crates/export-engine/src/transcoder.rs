//! Transcoding engine invocation.
//!
//! Every transcode is a separate `ffmpeg` process with an explicit argument
//! list. Exit code 0 is success; anything else becomes a
//! [`FramecastError::Transcode`] carrying the captured stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use framecast_common::error::{FramecastError, FramecastResult};

use crate::process::{command_exists, terminate_child};
use crate::session::CancelToken;

/// A finished, successful transcode.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    /// Captured stderr (diagnostics only).
    pub stderr: String,
    pub elapsed: Duration,
}

/// Progress parsed from `-progress pipe:1` output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TranscodeProgress {
    pub out_time_secs: f64,
    pub frame: u64,
    pub complete: bool,
}

/// The external transcoding engine, as seen by the proxy service and the
/// chunk combiner.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Run one transcode to completion, or until `cancel` trips.
    async fn run(&self, args: Vec<String>, cancel: &CancelToken)
        -> FramecastResult<TranscodeOutput>;
}

/// `ffmpeg` subprocess transcoder.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    kill_grace: Duration,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, kill_grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            kill_grace,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Check if the binary can be found.
    pub fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    /// Run a transcode, reporting `-progress pipe:1` blocks as they arrive.
    pub async fn run_with_progress(
        &self,
        args: Vec<String>,
        cancel: &CancelToken,
        on_progress: &mut (dyn FnMut(TranscodeProgress) + Send),
    ) -> FramecastResult<TranscodeOutput> {
        cancel.ensure_active()?;
        tracing::debug!(binary = %self.binary.display(), args = ?args, "Running transcoder");

        let started = Instant::now();
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FramecastError::transcode(
                    format!("Failed to start {}: {e}", self.binary.display()),
                    "",
                )
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FramecastError::transcode("Failed to capture transcoder stdout", ""))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FramecastError::transcode("Failed to capture transcoder stderr", ""))?;

        // Drain stderr concurrently so a full pipe cannot stall the process.
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read transcoder stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    terminate_child(&mut child, self.kill_grace).await;
                    stderr_task.abort();
                    tracing::info!(pid = child.id(), "Transcode cancelled");
                    return Err(FramecastError::Cancelled);
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some((key, value)) = line.trim().split_once('=') {
                                state.update(key, value);
                                if key == "progress" {
                                    on_progress(state.snapshot());
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(error = %e, "Transcoder stdout closed with error");
                            break;
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate_child(&mut child, self.kill_grace).await;
                stderr_task.abort();
                return Err(FramecastError::Cancelled);
            }
            status = child.wait() => status.map_err(|e| {
                FramecastError::transcode(format!("Failed to wait on transcoder: {e}"), "")
            })?,
        };

        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            tracing::debug!(stderr = %stderr_output.trim(), "Transcoder failed");
            return Err(FramecastError::transcode(
                format!("transcoder exited with {status}"),
                stderr_output,
            ));
        }

        Ok(TranscodeOutput {
            stderr: stderr_output,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(
        &self,
        args: Vec<String>,
        cancel: &CancelToken,
    ) -> FramecastResult<TranscodeOutput> {
        self.run_with_progress(args, cancel, &mut |_| {}).await
    }
}

/// Accumulates one `-progress` key/value block.
#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    frame: u64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "frame" => {
                if let Ok(frame) = value.trim().parse::<u64>() {
                    self.frame = frame;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> TranscodeProgress {
        TranscodeProgress {
            out_time_secs: self.out_time_secs,
            frame: self.frame,
            complete: self.complete,
        }
    }
}

/// Arguments shared by every invocation: overwrite, quiet, no stats.
pub fn base_args() -> Vec<String> {
    ["-y", "-hide_banner", "-loglevel", "error", "-nostats"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_state_parses_block() {
        let mut state = ProgressState::default();
        state.update("frame", "42");
        state.update("out_time_us", "1400000");
        state.update("progress", "continue");
        let snap = state.snapshot();
        assert_eq!(snap.frame, 42);
        assert!((snap.out_time_secs - 1.4).abs() < 1e-9);
        assert!(!snap.complete);

        state.update("progress", "end");
        assert!(state.snapshot().complete);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_transcode_error() {
        let transcoder = FfmpegTranscoder::new("false", Duration::from_millis(100));
        let err = transcoder
            .run(vec![], &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FramecastError::Transcode { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_transcode() {
        let transcoder = FfmpegTranscoder::new("sleep", Duration::from_millis(200));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = transcoder
            .run(vec!["30".to_string()], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
