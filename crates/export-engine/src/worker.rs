//! Renderer worker processes.
//!
//! A worker is started with its [`WorkerInit`] written as one JSON line on
//! stdin. Its stdout is parsed into [`WorkerMessage`]s and delivered over a
//! bounded channel that closes when the process closes stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use framecast_common::error::{stderr_tail, FramecastError, FramecastResult};
use framecast_job_model::protocol::{WorkerInit, WorkerMessage};

use crate::process::{command_exists, terminate_child};

/// Capacity of each worker's message channel.
pub const MESSAGE_BUFFER: usize = 64;

/// Bytes of worker stderr kept for diagnostics.
const STDERR_KEEP_BYTES: usize = 8192;

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    pub code: Option<i32>,
    /// Tail of the worker's stderr.
    pub stderr: String,
}

/// A supervised renderer instance.
#[async_trait]
pub trait WorkerProcess: Send {
    fn id(&self) -> u32;

    /// Next message; `None` once the worker closed its channel.
    async fn recv(&mut self) -> Option<WorkerMessage>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> WorkerExit;

    /// Graceful stop, then forced kill after `grace`.
    async fn terminate(&mut self, grace: Duration);
}

/// Starts renderer workers.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Fail fast when workers cannot be started at all.
    fn preflight(&self) -> FramecastResult<()> {
        Ok(())
    }

    async fn spawn(&self, init: WorkerInit) -> FramecastResult<Box<dyn WorkerProcess>>;
}

/// Spawns the renderer as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    /// Extra environment for every worker (e.g. `RUST_LOG`).
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    fn preflight(&self) -> FramecastResult<()> {
        if command_exists(&self.program) {
            Ok(())
        } else {
            Err(FramecastError::config(format!(
                "renderer program not found: {}",
                self.program.display()
            )))
        }
    }

    async fn spawn(&self, init: WorkerInit) -> FramecastResult<Box<dyn WorkerProcess>> {
        let id = init.worker_index;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FramecastError::render(format!(
                    "failed to start renderer {}: {e}",
                    self.program.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| FramecastError::render("renderer stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FramecastError::render("renderer stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FramecastError::render("renderer stderr unavailable"))?;

        let mut line = serde_json::to_string(&init)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.shutdown().await?;
        drop(stdin);

        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(message) = WorkerMessage::parse_line(&line) {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
            }
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_sink = Arc::clone(&stderr_buf);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(worker = id, "{line}");
                if let Ok(mut buf) = stderr_sink.lock() {
                    buf.push_str(&line);
                    buf.push('\n');
                    if buf.len() > STDERR_KEEP_BYTES * 2 {
                        *buf = stderr_tail(&buf, STDERR_KEEP_BYTES);
                    }
                }
            }
        });

        tracing::debug!(worker = id, pid = child.id(), "Renderer worker started");
        Ok(Box::new(ProcessWorker {
            id,
            child,
            messages: rx,
            reader,
            stderr_task,
            stderr_done: false,
            stderr: stderr_buf,
        }))
    }
}

struct ProcessWorker {
    id: u32,
    child: Child,
    messages: mpsc::Receiver<WorkerMessage>,
    reader: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    stderr_done: bool,
    stderr: Arc<Mutex<String>>,
}

impl ProcessWorker {
    fn stderr(&self) -> String {
        self.stderr
            .lock()
            .map(|buf| stderr_tail(&buf, STDERR_KEEP_BYTES))
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkerProcess for ProcessWorker {
    fn id(&self) -> u32 {
        self.id
    }

    async fn recv(&mut self) -> Option<WorkerMessage> {
        self.messages.recv().await
    }

    async fn wait(&mut self) -> WorkerExit {
        let status = self.child.wait().await;
        // Let the stderr reader reach EOF so the tail is complete.
        if !self.stderr_done {
            let drained =
                tokio::time::timeout(Duration::from_millis(500), &mut self.stderr_task).await;
            self.stderr_done = drained.is_ok();
        }
        match status {
            Ok(status) => WorkerExit {
                success: status.success(),
                code: status.code(),
                stderr: self.stderr(),
            },
            Err(e) => WorkerExit {
                success: false,
                code: None,
                stderr: format!("failed to wait on renderer: {e}"),
            },
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        terminate_child(&mut self.child, grace).await;
        self.reader.abort();
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.reader.abort();
        self.stderr_task.abort();
    }
}
