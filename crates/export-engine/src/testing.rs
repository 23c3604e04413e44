//! In-process fakes for the subprocess seams.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_job_model::chunk::{ChunkPlan, ChunkResult};
use framecast_job_model::job::{Clip, ExportFormat, QualityPreset};
use framecast_job_model::progress::ExportStage;
use framecast_job_model::protocol::{ChunkProgress, WorkerInit, WorkerMessage};
use framecast_job_model::worker_config::{CodecSettings, CompositionMeta, ExportJobConfig, InputProps};

use crate::probe::{MediaInfo, MediaProber};
use crate::session::CancelToken;
use crate::transcoder::{TranscodeOutput, Transcoder};
use crate::worker::{WorkerExit, WorkerProcess, WorkerSpawner, MESSAGE_BUFFER};

/// Writes a fixed number of bytes to the last argument (the output path).
pub(crate) struct FakeTranscoder {
    output_bytes: u64,
    sizes: Vec<u64>,
    delay: Duration,
    fail_first: usize,
    calls: AtomicUsize,
    args: Mutex<Vec<Vec<String>>>,
    manifests: Mutex<Vec<String>>,
}

impl FakeTranscoder {
    pub fn new(output_bytes: u64) -> Self {
        Self {
            output_bytes,
            sizes: Vec::new(),
            delay: Duration::ZERO,
            fail_first: 0,
            calls: AtomicUsize::new(0),
            args: Mutex::new(Vec::new()),
            manifests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    /// Fail the first `n` calls with a non-zero exit.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Output size per call; calls past the list use the default size.
    pub fn with_output_sizes(mut self, sizes: Vec<u64>) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_args(&self) -> Option<Vec<String>> {
        self.args.lock().unwrap().last().cloned()
    }

    pub fn all_args(&self) -> Vec<Vec<String>> {
        self.args.lock().unwrap().clone()
    }

    /// Contents of `.txt` inputs seen at call time.
    pub fn manifests(&self) -> Vec<String> {
        self.manifests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn run(&self, args: Vec<String>, cancel: &CancelToken) -> FramecastResult<TranscodeOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.args.lock().unwrap().push(args.clone());

        for pair in args.windows(2) {
            if pair[0] == "-i" && pair[1].ends_with(".txt") {
                if let Ok(text) = std::fs::read_to_string(&pair[1]) {
                    self.manifests.lock().unwrap().push(text);
                }
            }
        }

        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FramecastError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        cancel.ensure_active()?;

        if call < self.fail_first {
            return Err(FramecastError::transcode("fake transcoder failure", "fake stderr"));
        }

        let size = self.sizes.get(call).copied().unwrap_or(self.output_bytes);
        if let Some(output) = args.last() {
            std::fs::write(Path::new(output), vec![0u8; size as usize])?;
        }
        Ok(TranscodeOutput {
            stderr: String::new(),
            elapsed: started.elapsed(),
        })
    }
}

pub(crate) struct FakeProber {
    info: MediaInfo,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            info: MediaInfo {
                width,
                height,
                fps: Some(30.0),
                duration_secs: Some(10.0),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> FramecastResult<MediaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.exists() {
            Ok(self.info)
        } else {
            Err(FramecastError::FileNotFound {
                path: PathBuf::from(path),
            })
        }
    }
}

/// A 1080p30, 10 second H.264 export with one clip.
pub(crate) fn sample_config() -> ExportJobConfig {
    ExportJobConfig {
        composition_id: "sample".to_string(),
        composition: CompositionMeta {
            width: 1920,
            height: 1080,
            fps: 30,
            total_frames: 300,
            duration_secs: 10.0,
        },
        input_props: InputProps {
            clips: vec![Clip {
                id: "a".to_string(),
                source: PathBuf::from("/media/a.mp4"),
                timeline_start_secs: 0.0,
                source_in_secs: 0.0,
                duration_secs: 10.0,
                source_width: Some(1920),
                source_height: Some(1080),
                source_fps: Some(30.0),
                has_audio: true,
            }],
            effects: vec![],
        },
        codec: CodecSettings {
            format: ExportFormat::Mp4H264,
            quality: QualityPreset::Standard,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
        },
        concurrency: 2,
        timeout_ms: 60_000,
        video_cache_size_bytes: 512 * 1024 * 1024,
        chunk_plan: ChunkPlan::single(300, 30),
    }
}

/// Bytes a fake worker writes per chunk.
pub(crate) const FAKE_CHUNK_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeBehavior {
    Succeed,
    /// Report a failed result for this chunk index.
    FailChunk(u32),
    /// Exit with code 1 after the first progress report.
    Crash,
    /// Report progress once, then never finish.
    Hang,
    /// Finish other chunks; leave a partial file for this one and stall.
    HangOn(u32),
}

/// Spawns in-process workers that follow a script.
pub(crate) struct FakeSpawner {
    behavior: FakeBehavior,
    live: Arc<AtomicUsize>,
    spawned: AtomicUsize,
    inits: Mutex<Vec<WorkerInit>>,
}

impl FakeSpawner {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            live: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            inits: Mutex::new(Vec::new()),
        }
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Workers not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> Vec<WorkerInit> {
        self.inits.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(&self, init: WorkerInit) -> FramecastResult<Box<dyn WorkerProcess>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        self.inits.lock().unwrap().push(init.clone());

        let behavior = self.behavior;
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let assignments = init.assignments;
        let task = tokio::spawn(async move {
            for assignment in assignments {
                let index = assignment.chunk.index;
                tokio::time::sleep(Duration::from_millis(5)).await;
                let progress = ChunkProgress {
                    chunk_index: index,
                    rendered_frames: assignment.chunk.frame_count / 2,
                    total_frames: assignment.chunk.frame_count,
                    stage: ExportStage::Rendering,
                };
                let _ = tx.send(WorkerMessage::Progress(progress)).await;

                let result = match behavior {
                    FakeBehavior::Hang => std::future::pending::<ChunkResult>().await,
                    FakeBehavior::HangOn(stalled) if stalled == index => {
                        let _ = std::fs::write(&assignment.output_path, vec![0u8; FAKE_CHUNK_BYTES / 2]);
                        std::future::pending::<ChunkResult>().await
                    }
                    FakeBehavior::Crash => return 1,
                    FakeBehavior::FailChunk(failing) if failing == index => {
                        ChunkResult::failed(index, "encoder error")
                    }
                    _ => {
                        if std::fs::write(&assignment.output_path, vec![0u8; FAKE_CHUNK_BYTES]).is_err() {
                            return 2;
                        }
                        ChunkResult::ok(index, &assignment.output_path)
                    }
                };
                let _ = tx.send(WorkerMessage::Result(result)).await;
            }
            0
        });

        Ok(Box::new(FakeWorker {
            id: init.worker_index,
            messages: rx,
            task: Some(task),
            live: Arc::clone(&self.live),
        }))
    }
}

struct FakeWorker {
    id: u32,
    messages: mpsc::Receiver<WorkerMessage>,
    task: Option<JoinHandle<i32>>,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkerProcess for FakeWorker {
    fn id(&self) -> u32 {
        self.id
    }

    async fn recv(&mut self) -> Option<WorkerMessage> {
        self.messages.recv().await
    }

    async fn wait(&mut self) -> WorkerExit {
        let code = match self.task.take() {
            Some(task) => task.await.ok(),
            None => None,
        };
        WorkerExit {
            success: code == Some(0),
            code,
            stderr: if code == Some(1) { "segfault".to_string() } else { String::new() },
        }
    }

    async fn terminate(&mut self, _grace: Duration) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
