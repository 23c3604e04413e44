//! Subprocess helpers shared by the transcoder and the worker coordinator.

use std::path::Path;
use std::time::Duration;

use tokio::process::Child;

/// Stop a child: graceful signal first, forced kill after `grace`.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if request_graceful_stop(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => return,
            Err(_) => tracing::warn!(
                pid = child.id(),
                grace_ms = grace.as_millis() as u64,
                "Process ignored graceful stop, killing"
            ),
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill process");
    }
}

#[cfg(unix)]
fn request_graceful_stop(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is our own child, which has not been reaped yet.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_graceful_stop(_child: &Child) -> bool {
    false
}

/// Whether `binary` resolves to an executable (absolute path or `PATH` lookup).
pub fn command_exists(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    which::which(binary).is_ok()
}
