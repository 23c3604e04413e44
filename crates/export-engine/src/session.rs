//! Export sessions and cooperative cancellation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use framecast_common::clock::SessionClock;
use framecast_common::error::{FramecastError, FramecastResult};

/// Cloneable cancellation signal. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Returns `true` if this call did the cancelling.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped.
    pub fn ensure_active(&self) -> FramecastResult<()> {
        if self.is_cancelled() {
            Err(FramecastError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the check so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// State of one export call.
///
/// Owned by the orchestrator and handed by reference to every component.
/// Temporary files registered here are removed by [`ExportSession::cleanup`].
#[derive(Debug)]
pub struct ExportSession {
    id: String,
    clock: SessionClock,
    work_dir: PathBuf,
    cancel: CancelToken,
    temp_files: Mutex<Vec<PathBuf>>,
}

impl ExportSession {
    /// Create a session whose scratch directory lives under `work_root`.
    pub fn new(work_root: &Path) -> Self {
        let id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
            std::process::id()
        );
        Self::with_id(id, work_root)
    }

    pub fn with_id(id: impl Into<String>, work_root: &Path) -> Self {
        let id = id.into();
        Self {
            work_dir: work_root.join(format!("export-{id}")),
            id,
            clock: SessionClock::start(),
            cancel: CancelToken::new(),
            temp_files: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Create the scratch directory.
    pub fn prepare_work_dir(&self) -> FramecastResult<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }

    /// Path for a scratch file inside the work directory, registered for cleanup.
    pub fn temp_path(&self, file_name: &str) -> PathBuf {
        let path = self.work_dir.join(file_name);
        self.register_temp_file(path.clone());
        path
    }

    pub fn register_temp_file(&self, path: PathBuf) {
        if let Ok(mut files) = self.temp_files.lock() {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }

    /// Stop tracking a file that has been handed over to the caller.
    pub fn release_temp_file(&self, path: &Path) {
        if let Ok(mut files) = self.temp_files.lock() {
            files.retain(|p| p != path);
        }
    }

    /// Registered temporary files that still exist on disk.
    pub fn remaining_temp_files(&self) -> Vec<PathBuf> {
        self.temp_files
            .lock()
            .map(|files| files.iter().filter(|p| p.exists()).cloned().collect())
            .unwrap_or_default()
    }

    /// Delete every registered temporary file and the work directory.
    pub fn cleanup(&self) {
        let files = self
            .temp_files
            .lock()
            .map(|mut files| std::mem::take(&mut *files))
            .unwrap_or_default();

        let mut removed = 0usize;
        for path in files {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file")
                }
            }
        }

        if self.work_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.work_dir) {
                tracing::warn!(
                    path = %self.work_dir.display(),
                    error = %e,
                    "Failed to remove export work directory"
                );
            }
        }
        tracing::debug!(session = %self.id, removed, "Export resources cleaned up");
    }
}
