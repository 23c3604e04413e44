//! Worker coordinator.
//!
//! Spawns and supervises renderer workers for one export, collects exactly
//! one [`ChunkResult`] per chunk, and tears every worker down on all exit
//! paths. Each worker has its own deadline; the export-wide cancel token
//! and a sibling-abort token stop workers early.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_job_model::chunk::{Chunk, ChunkResult};
use framecast_job_model::progress::{ExportResult, ExportStage};
use framecast_job_model::protocol::{ChunkAssignment, ChunkProgress, WorkerInit, WorkerMessage};
use framecast_job_model::worker_config::ExportJobConfig;

use crate::combiner::ChunkCombiner;
use crate::session::{CancelToken, ExportSession};
use crate::tracker::ProgressTracker;
use crate::worker::{WorkerProcess, WorkerSpawner, MESSAGE_BUFFER};

/// Error recorded on chunks stopped because a sibling failed.
const SIBLING_ABORTED: &str = "stopped after another segment failed";

/// What a chunk failure means for the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailurePolicy {
    /// Any failed chunk fails the export and stops the other workers.
    #[default]
    Fatal,
    /// Combine whatever succeeded. Only for callers that accept gaps.
    SkipFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RunMode {
    Sequential,
    Parallel { workers: u32 },
}

/// Coordinator lifecycle for the current or most recent export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CoordinatorState {
    Idle,
    Running(RunMode),
    Completed,
    Failed,
    Cancelled,
}

/// A finished render at its final location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOutput {
    pub output_path: PathBuf,
    pub file_size: u64,
    /// Chunks left out under [`ChunkFailurePolicy::SkipFailed`].
    pub skipped_chunks: Vec<u32>,
}

pub struct WorkerCoordinator {
    spawner: Arc<dyn WorkerSpawner>,
    combiner: ChunkCombiner,
    kill_grace: Duration,
    failure_policy: ChunkFailurePolicy,
    state: Mutex<CoordinatorState>,
    current: Mutex<Option<CancelToken>>,
    live: Arc<AtomicUsize>,
}

impl WorkerCoordinator {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, combiner: ChunkCombiner, kill_grace: Duration) -> Self {
        Self {
            spawner,
            combiner,
            kill_grace,
            failure_policy: ChunkFailurePolicy::default(),
            state: Mutex::new(CoordinatorState::Idle),
            current: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_failure_policy(mut self, policy: ChunkFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(CoordinatorState::Idle)
    }

    /// Workers spawned and not yet reaped.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Check that workers can be started at all.
    pub fn preflight(&self) -> FramecastResult<()> {
        self.spawner.preflight()
    }

    /// Render the whole range with one worker and move the result to `output`.
    pub async fn run_sequential_export(
        &self,
        session: &ExportSession,
        config: &ExportJobConfig,
        output: &Path,
        tracker: &ProgressTracker,
    ) -> FramecastResult<RenderedOutput> {
        self.begin(session, RunMode::Sequential);
        let result = self.sequential(session, config, output, tracker).await;
        self.finish(&result);
        result
    }

    /// Render chunks on `worker_count` workers and combine them into `output`.
    pub async fn run_parallel_export(
        &self,
        session: &ExportSession,
        config: &ExportJobConfig,
        worker_count: u32,
        output: &Path,
        tracker: &ProgressTracker,
    ) -> FramecastResult<RenderedOutput> {
        let workers = worker_count.clamp(1, config.chunk_plan.len().max(1) as u32);
        self.begin(session, RunMode::Parallel { workers });
        let result = self.parallel(session, config, workers, output, tracker).await;
        self.finish(&result);
        result
    }

    /// Cancel the running export. No-op when idle; safe to call repeatedly.
    pub fn cancel_export(&self) {
        let token = self.current.lock().ok().and_then(|c| c.clone());
        if let Some(token) = token {
            if token.cancel() {
                tracing::info!("Export cancellation requested");
            }
        }
    }

    /// Delete the session's temporary files and work directory.
    pub fn cleanup_export_resources(&self, session: &ExportSession) {
        let leftover = session.remaining_temp_files().len();
        session.cleanup();
        let live = self.live_workers();
        if live > 0 {
            tracing::warn!(live, "Renderer workers still alive after cleanup");
        }
        tracing::debug!(session = session.id(), leftover, "Export resources released");
    }

    fn begin(&self, session: &ExportSession, mode: RunMode) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(session.cancel_token().clone());
        }
        if let Ok(mut state) = self.state.lock() {
            *state = CoordinatorState::Running(mode);
        }
        tracing::info!(session = session.id(), mode = ?mode, "Rendering started");
    }

    fn finish<T>(&self, result: &FramecastResult<T>) {
        let next = match result {
            Ok(_) => CoordinatorState::Completed,
            Err(e) if e.is_cancelled() => CoordinatorState::Cancelled,
            Err(_) => CoordinatorState::Failed,
        };
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    async fn spawn_worker(&self, init: WorkerInit) -> FramecastResult<(Box<dyn WorkerProcess>, LiveGuard)> {
        let worker = self.spawner.spawn(init).await?;
        Ok((worker, LiveGuard::new(Arc::clone(&self.live))))
    }

    async fn sequential(
        &self,
        session: &ExportSession,
        config: &ExportJobConfig,
        output: &Path,
        tracker: &ProgressTracker,
    ) -> FramecastResult<RenderedOutput> {
        let cancel = session.cancel_token();
        cancel.ensure_active()?;

        let total_frames = config.chunk_plan.total_frames;
        let chunk = Chunk {
            index: 0,
            start_frame: 0,
            frame_count: total_frames,
        };
        let temp = session.temp_path(&format!("render.{}", config.codec.format.extension()));
        let init = WorkerInit {
            worker_index: 0,
            config: config.clone(),
            assignments: vec![ChunkAssignment {
                chunk,
                output_path: temp.clone(),
            }],
        };

        let outcome = self
            .render_single(session, config, init, &temp, output, tracker)
            .await;
        if outcome.is_err() {
            remove_if_exists(&temp);
        }
        outcome
    }

    async fn render_single(
        &self,
        session: &ExportSession,
        config: &ExportJobConfig,
        init: WorkerInit,
        temp: &Path,
        output: &Path,
        tracker: &ProgressTracker,
    ) -> FramecastResult<RenderedOutput> {
        let cancel = session.cancel_token();
        let assignments = init.assignments.clone();

        tracker.on_stage(ExportStage::Rendering, 0.0, "Rendering");
        let (worker, guard) = self.spawn_worker(init).await?;
        let results = supervise_worker(
            worker,
            guard,
            assignments,
            Duration::from_millis(config.timeout_ms),
            cancel.clone(),
            CancelToken::new(),
            ProgressSink::Single(tracker.clone()),
            self.kill_grace,
            true,
        )
        .await;
        cancel.ensure_active()?;

        let result = results
            .into_iter()
            .next()
            .ok_or_else(|| FramecastError::render("renderer produced no result"))?;
        if !result.success {
            let message = result.error.unwrap_or_else(|| "render failed".to_string());
            return Err(FramecastError::chunk_failed(result.index, message));
        }

        tracker.on_stage(ExportStage::Finalizing, 0.0, "Writing output file");
        move_into_place(temp, output)?;
        session.release_temp_file(temp);
        let file_size = std::fs::metadata(output)?.len();
        Ok(RenderedOutput {
            output_path: output.to_path_buf(),
            file_size,
            skipped_chunks: Vec::new(),
        })
    }

    async fn parallel(
        &self,
        session: &ExportSession,
        config: &ExportJobConfig,
        workers: u32,
        output: &Path,
        tracker: &ProgressTracker,
    ) -> FramecastResult<RenderedOutput> {
        let cancel = session.cancel_token();
        cancel.ensure_active()?;

        let ext = config.codec.format.extension();
        let mut per_worker: Vec<Vec<ChunkAssignment>> = vec![Vec::new(); workers as usize];
        for chunk in &config.chunk_plan.chunks {
            let output_path = session.temp_path(&format!("chunk_{:04}.{ext}", chunk.index));
            per_worker[chunk.index as usize % workers as usize].push(ChunkAssignment {
                chunk: *chunk,
                output_path,
            });
        }

        tracker.on_stage(ExportStage::Rendering, 0.0, "Rendering segments");
        let fatal = self.failure_policy == ChunkFailurePolicy::Fatal;
        let siblings = CancelToken::new();
        let mut tasks = JoinSet::new();
        let mut attachments = Vec::new();
        let mut spawn_error = None;

        for (worker_index, assignments) in per_worker.into_iter().enumerate() {
            if assignments.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            let init = WorkerInit {
                worker_index: worker_index as u32,
                config: config.clone(),
                assignments: assignments.clone(),
            };
            let (worker, guard) = match self.spawn_worker(init).await {
                Ok(spawned) => spawned,
                Err(e) => {
                    tracing::error!(worker = worker_index, error = %e, "Failed to start renderer worker");
                    siblings.cancel();
                    spawn_error = Some(e);
                    break;
                }
            };

            let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
            attachments.push(tracker.attach(worker_index as u32, rx));
            let timeout = Duration::from_millis(config.timeout_ms.saturating_mul(assignments.len() as u64));
            tasks.spawn(supervise_worker(
                worker,
                guard,
                assignments,
                timeout,
                cancel.clone(),
                siblings.clone(),
                ProgressSink::Channel(tx),
                self.kill_grace,
                fatal,
            ));
        }

        let mut results = Vec::with_capacity(config.chunk_plan.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(e) => tracing::error!(error = %e, "Worker supervision task failed"),
            }
        }
        for attachment in attachments {
            attachment.drained().await;
        }

        let outcome = self
            .collect_parallel(session, config, output, tracker, results, spawn_error)
            .await;
        if outcome.is_err() {
            remove_chunk_outputs(&config.chunk_plan.chunks, session, ext);
        }
        outcome
    }

    async fn collect_parallel(
        &self,
        session: &ExportSession,
        config: &ExportJobConfig,
        output: &Path,
        tracker: &ProgressTracker,
        mut results: Vec<ChunkResult>,
        spawn_error: Option<FramecastError>,
    ) -> FramecastResult<RenderedOutput> {
        let cancel = session.cancel_token();
        cancel.ensure_active()?;
        if let Some(e) = spawn_error {
            return Err(e);
        }

        results.sort_by_key(|r| r.index);
        let failed: Vec<&ChunkResult> = results.iter().filter(|r| !r.success).collect();
        let mut skipped_chunks = Vec::new();
        if !failed.is_empty() {
            // Report the root cause rather than a sibling stopped because of it.
            let first = failed
                .iter()
                .find(|r| r.error.as_deref() != Some(SIBLING_ABORTED))
                .or(failed.first())
                .copied();
            if let (ChunkFailurePolicy::Fatal, Some(first)) = (self.failure_policy, first) {
                let message = first.error.clone().unwrap_or_else(|| "render failed".to_string());
                return Err(FramecastError::chunk_failed(first.index, message));
            }
            skipped_chunks = failed.iter().map(|r| r.index).collect();
            tracing::warn!(skipped = ?skipped_chunks, "Combining without failed segments");
        }

        tracker.on_stage(ExportStage::Encoding, 0.0, "Combining segments");
        ensure_parent_dir(output)?;
        let combined = self
            .combiner
            .combine_and_cleanup(&results, output, session.work_dir(), config.codec.format, cancel)
            .await?;
        tracker.on_stage(ExportStage::Finalizing, 0.0, "Writing output file");

        Ok(RenderedOutput {
            output_path: combined.output_path,
            file_size: combined.file_size,
            skipped_chunks,
        })
    }
}

/// Convert a render outcome into the caller-facing result.
pub fn export_result_from(outcome: FramecastResult<RenderedOutput>) -> ExportResult {
    match outcome {
        Ok(rendered) => ExportResult::Completed {
            output_path: rendered.output_path,
            file_size: rendered.file_size,
        },
        Err(e) if e.is_cancelled() => ExportResult::Cancelled,
        Err(e) => {
            if let Some(stderr) = e.stderr() {
                tracing::debug!(stderr, "Subprocess stderr");
            }
            ExportResult::Failed {
                error: e.user_message(),
            }
        }
    }
}

/// Counts a spawned worker until its supervision ends.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ProgressSink {
    Single(ProgressTracker),
    Channel(mpsc::Sender<ChunkProgress>),
}

impl ProgressSink {
    async fn send(&self, progress: ChunkProgress) {
        match self {
            ProgressSink::Single(tracker) => {
                tracker.on_single(ExportStage::Rendering, progress.rendered_frames, "Rendering");
            }
            ProgressSink::Channel(tx) => {
                let _ = tx.send(progress).await;
            }
        }
    }
}

/// Drive one worker until all its chunks reported, it exits, times out, or
/// is stopped. Returns exactly one result per assigned chunk.
#[allow(clippy::too_many_arguments)]
async fn supervise_worker(
    mut worker: Box<dyn WorkerProcess>,
    live: LiveGuard,
    assignments: Vec<ChunkAssignment>,
    timeout: Duration,
    cancel: CancelToken,
    siblings: CancelToken,
    sink: ProgressSink,
    grace: Duration,
    fatal: bool,
) -> Vec<ChunkResult> {
    let worker_id = worker.id();
    let assigned: BTreeMap<u32, PathBuf> = assignments
        .iter()
        .map(|a| (a.chunk.index, a.output_path.clone()))
        .collect();
    let mut results: BTreeMap<u32, ChunkResult> = BTreeMap::new();
    let deadline = tokio::time::Instant::now() + timeout;

    let stop_reason: Option<(String, bool)> = loop {
        if results.len() == assigned.len() {
            break None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                worker.terminate(grace).await;
                break Some(("export cancelled".to_string(), false));
            }
            _ = siblings.cancelled() => {
                worker.terminate(grace).await;
                break Some((SIBLING_ABORTED.to_string(), false));
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(worker = worker_id, timeout_ms = timeout.as_millis() as u64, "Renderer timed out");
                worker.terminate(grace).await;
                break Some((format!("renderer timed out after {timeout:?}"), true));
            }
            message = worker.recv() => match message {
                Some(WorkerMessage::Progress(progress)) => {
                    if assigned.contains_key(&progress.chunk_index) {
                        sink.send(progress).await;
                    }
                }
                Some(WorkerMessage::Result(result)) => {
                    let Some(expected_path) = assigned.get(&result.index) else {
                        tracing::warn!(worker = worker_id, chunk = result.index, "Result for unassigned chunk ignored");
                        continue;
                    };
                    if results.contains_key(&result.index) {
                        continue;
                    }
                    let result = checked_result(result, expected_path);
                    if !result.success {
                        tracing::warn!(worker = worker_id, chunk = result.index, error = ?result.error, "Chunk failed");
                        if fatal {
                            siblings.cancel();
                        }
                    } else {
                        tracing::debug!(worker = worker_id, chunk = result.index, "Chunk rendered");
                    }
                    results.insert(result.index, result);
                }
                None => {
                    let exit = worker.wait().await;
                    if !exit.stderr.is_empty() {
                        tracing::debug!(worker = worker_id, stderr = %exit.stderr, "Renderer stderr");
                    }
                    let status = exit
                        .code
                        .map(|c| format!("exit code {c}"))
                        .unwrap_or_else(|| "killed by signal".to_string());
                    tracing::warn!(worker = worker_id, status = %status, "Renderer exited before reporting all segments");
                    break Some((format!("renderer exited unexpectedly ({status})"), true));
                }
            }
        }
    };

    match &stop_reason {
        None => {
            // Everything reported; give the process a moment to exit on its own.
            if tokio::time::timeout(grace, worker.wait()).await.is_err() {
                worker.terminate(grace).await;
            }
        }
        Some((reason, own_failure)) => {
            if *own_failure && fatal {
                siblings.cancel();
            }
            for index in assigned.keys() {
                results
                    .entry(*index)
                    .or_insert_with(|| ChunkResult::failed(*index, reason.clone()));
            }
        }
    }

    drop(worker);
    drop(live);
    results.into_values().collect()
}

/// A success must point at the assigned file, and the file must exist.
fn checked_result(mut result: ChunkResult, expected_path: &Path) -> ChunkResult {
    if !result.success {
        return result;
    }
    if !expected_path.exists() {
        return ChunkResult::failed(result.index, "renderer reported success but wrote no output");
    }
    result.path = Some(expected_path.to_path_buf());
    result
}

fn remove_chunk_outputs(chunks: &[Chunk], session: &ExportSession, ext: &str) {
    for chunk in chunks {
        remove_if_exists(&session.work_dir().join(format!("chunk_{:04}.{ext}", chunk.index)));
    }
}

fn remove_if_exists(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

fn ensure_parent_dir(path: &Path) -> FramecastResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Move a finished file to its destination, copying across file systems.
fn move_into_place(from: &Path, to: &Path) -> FramecastResult<()> {
    ensure_parent_dir(to)?;
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
