//! Progress tracker.
//!
//! Folds single-stream and per-chunk progress into one non-decreasing
//! 0–100 value. Each stage owns a fixed band of the scale so proxy
//! generation, rendering and muxing show up as distinct phases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use framecast_common::clock::{RateController, SessionClock, Throughput};
use framecast_job_model::progress::{ExportProgress, ExportStage};
use framecast_job_model::protocol::ChunkProgress;

/// Receives every forwarded progress report.
pub type ProgressCallback = Arc<dyn Fn(ExportProgress) + Send + Sync>;

/// Maximum rate of forwarded reports within one stage.
const EMIT_HZ: u32 = 20;

/// Band of the overall scale owned by `stage`.
pub fn stage_band(stage: ExportStage) -> (f64, f64) {
    match stage {
        ExportStage::Preparing => (0.0, 10.0),
        ExportStage::Rendering => (10.0, 90.0),
        ExportStage::Encoding => (90.0, 98.0),
        ExportStage::Finalizing => (98.0, 100.0),
        ExportStage::Complete => (100.0, 100.0),
    }
}

fn map_into_band(stage: ExportStage, fraction: f64) -> f64 {
    let (start, end) = stage_band(stage);
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    start + (end - start) * fraction
}

#[derive(Debug)]
struct TrackerState {
    total_frames: u64,
    /// chunk index -> (rendered, total)
    chunks: HashMap<u32, (u64, u64)>,
    single_frame: u64,
    last_progress: f64,
    last_stage: ExportStage,
    clock: SessionClock,
    rate: RateController,
}

impl TrackerState {
    fn new(total_frames: u64) -> Self {
        Self {
            total_frames,
            chunks: HashMap::new(),
            single_frame: 0,
            last_progress: 0.0,
            last_stage: ExportStage::Preparing,
            clock: SessionClock::start(),
            rate: RateController::new(EMIT_HZ),
        }
    }

    fn rendered_frames(&self) -> u64 {
        let chunked: u64 = self.chunks.values().map(|(r, t)| (*r).min(*t)).sum();
        chunked.max(self.single_frame).min(self.total_frames)
    }
}

/// Aggregates progress for one export session. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<TrackerState>>,
    callback: Option<ProgressCallback>,
    attachments: Arc<Mutex<Attachments>>,
}

/// Forwarding tasks by worker id, tagged with an attach generation.
#[derive(Debug, Default)]
struct Attachments {
    next_generation: u64,
    tasks: HashMap<u32, (u64, JoinHandle<()>)>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(total_frames: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::new(total_frames))),
            callback,
            attachments: Arc::new(Mutex::new(Attachments::default())),
        }
    }

    /// A stage-level event: `fraction` is completion within `stage`.
    pub fn on_stage(&self, stage: ExportStage, fraction: f64, message: impl Into<String>) -> ExportProgress {
        self.emit(stage, map_into_band(stage, fraction), message.into())
    }

    /// A single-stream render event (one renderer covering the whole range).
    pub fn on_single(&self, stage: ExportStage, current_frame: u64, message: impl Into<String>) -> ExportProgress {
        let fraction = {
            let Ok(mut state) = self.state.lock() else {
                return self.snapshot(message.into());
            };
            state.single_frame = state.single_frame.max(current_frame);
            if state.total_frames == 0 {
                0.0
            } else {
                state.rendered_frames() as f64 / state.total_frames as f64
            }
        };
        self.emit(stage, map_into_band(stage, fraction), message.into())
    }

    /// A per-chunk event. Aggregation is order-independent across chunks.
    pub fn on_chunk(&self, event: &ChunkProgress) -> ExportProgress {
        let (fraction, chunk_count) = {
            let Ok(mut state) = self.state.lock() else {
                return self.snapshot(String::new());
            };
            let entry = state.chunks.entry(event.chunk_index).or_insert((0, 0));
            entry.0 = entry.0.max(event.rendered_frames);
            entry.1 = event.total_frames;
            let fraction = if state.total_frames == 0 {
                0.0
            } else {
                state.rendered_frames() as f64 / state.total_frames as f64
            };
            (fraction, state.chunks.len())
        };
        let message = format!("Rendering ({chunk_count} segments active)");
        self.emit(
            ExportStage::Rendering,
            map_into_band(ExportStage::Rendering, fraction),
            message,
        )
    }

    /// Mark the export complete.
    pub fn complete(&self, message: impl Into<String>) -> ExportProgress {
        self.emit(ExportStage::Complete, 100.0, message.into())
    }

    /// Latest aggregated report without forwarding it.
    pub fn current(&self) -> ExportProgress {
        self.snapshot(String::new())
    }

    fn snapshot(&self, message: String) -> ExportProgress {
        match self.state.lock() {
            Ok(state) => build_report(&state, state.last_stage, state.last_progress, message),
            Err(_) => ExportProgress {
                progress: 0.0,
                stage: ExportStage::Preparing,
                message,
                current_frame: None,
                total_frames: None,
                fps: None,
                eta_secs: None,
            },
        }
    }

    fn emit(&self, stage: ExportStage, computed: f64, message: String) -> ExportProgress {
        let (report, forward) = {
            let Ok(mut state) = self.state.lock() else {
                return self.snapshot(message);
            };
            let stage_changed = stage > state.last_stage;
            let stage = stage.max(state.last_stage);
            let progress = computed.max(state.last_progress).min(100.0);
            state.last_stage = stage;
            state.last_progress = progress;

            let now = state.clock.elapsed_ms();
            let forward = stage_changed
                || stage == ExportStage::Complete
                || state.rate.should_tick(now);
            (build_report(&state, stage, progress, message), forward)
        };

        if forward {
            if let Some(callback) = &self.callback {
                callback(report.clone());
            }
        }
        report
    }

    /// Wire a worker's progress channel into the tracker.
    ///
    /// Attaching the same worker again replaces the previous attachment.
    /// Dropping or detaching the returned handle stops forwarding.
    pub fn attach(&self, worker_id: u32, mut events: mpsc::Receiver<ChunkProgress>) -> DetachHandle {
        let tracker = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracker.on_chunk(&event);
            }
        });

        let mut generation = 0;
        if let Ok(mut attachments) = self.attachments.lock() {
            attachments.next_generation += 1;
            generation = attachments.next_generation;
            if let Some((_, previous)) = attachments.tasks.insert(worker_id, (generation, task)) {
                previous.abort();
            }
        } else {
            task.abort();
        }

        DetachHandle {
            worker_id,
            generation,
            attachments: Arc::clone(&self.attachments),
        }
    }

    /// Number of live worker attachments.
    pub fn attached_count(&self) -> usize {
        self.attachments
            .lock()
            .map(|a| a.tasks.values().filter(|(_, t)| !t.is_finished()).count())
            .unwrap_or(0)
    }

    /// Clear per-chunk state and counters for a new session.
    pub fn reset(&self, total_frames: u64) {
        if let Ok(mut attachments) = self.attachments.lock() {
            for (_, (_, task)) in attachments.tasks.drain() {
                task.abort();
            }
        }
        if let Ok(mut state) = self.state.lock() {
            *state = TrackerState::new(total_frames);
        }
    }
}

fn build_report(state: &TrackerState, stage: ExportStage, progress: f64, message: String) -> ExportProgress {
    let rendered = state.rendered_frames();
    let has_frames = state.total_frames > 0 && stage >= ExportStage::Rendering;
    let throughput = Throughput::from_totals(rendered, state.total_frames, state.clock.epoch().elapsed());
    ExportProgress {
        progress,
        stage,
        message,
        current_frame: has_frames.then_some(rendered),
        total_frames: has_frames.then_some(state.total_frames),
        fps: (throughput.fps > 0.0).then_some(throughput.fps),
        eta_secs: throughput.eta_secs,
    }
}

/// Stops forwarding one worker's progress when detached or dropped.
#[derive(Debug)]
pub struct DetachHandle {
    worker_id: u32,
    generation: u64,
    attachments: Arc<Mutex<Attachments>>,
}

impl DetachHandle {
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Stop forwarding immediately. Detaching twice is a no-op.
    pub fn detach(self) {
        drop(self);
    }

    /// Wait until the forwarding task has drained its channel (all senders
    /// dropped), then detach.
    pub async fn drained(self) {
        if let Some(task) = self.take_own_task() {
            let _ = task.await;
        }
    }

    /// Remove this attachment's task unless a newer attach replaced it.
    fn take_own_task(&self) -> Option<JoinHandle<()>> {
        let mut attachments = self.attachments.lock().ok()?;
        let is_ours = attachments
            .tasks
            .get(&self.worker_id)
            .is_some_and(|(generation, _)| *generation == self.generation);
        if is_ours {
            attachments.tasks.remove(&self.worker_id).map(|(_, task)| task)
        } else {
            None
        }
    }
}

impl Drop for DetachHandle {
    fn drop(&mut self) {
        if let Some(task) = self.take_own_task() {
            task.abort();
        }
    }
}
