//! Error types shared across Framecast crates.

use std::path::PathBuf;

/// Maximum number of stderr bytes kept on a transcode error.
const STDERR_TAIL_BYTES: usize = 4096;

/// Top-level error type for Framecast operations.
#[derive(Debug, thiserror::Error)]
pub enum FramecastError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Machine profiling error: {message}")]
    Profile { message: String },

    #[error("Proxy error: {message}")]
    Proxy { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Transcode error: {message}")]
    Transcode { message: String, stderr: String },

    #[error("Combine error: {message}")]
    Combine { message: String },

    #[error("Chunk {index} failed: {message}")]
    ChunkFailed { index: u32, message: String },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("An export is already in progress")]
    ExportInProgress,

    #[error("Export cancelled")]
    Cancelled,

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FramecastError.
pub type FramecastResult<T> = Result<T, FramecastError>;

impl FramecastError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn profile(msg: impl Into<String>) -> Self {
        Self::Profile {
            message: msg.into(),
        }
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::Proxy {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn combine(msg: impl Into<String>) -> Self {
        Self::Combine {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    /// A failed transcode with the tail of the process stderr attached.
    pub fn transcode(msg: impl Into<String>, stderr: impl AsRef<str>) -> Self {
        Self::Transcode {
            message: msg.into(),
            stderr: stderr_tail(stderr.as_ref(), STDERR_TAIL_BYTES),
        }
    }

    pub fn chunk_failed(index: u32, msg: impl Into<String>) -> Self {
        Self::ChunkFailed {
            index,
            message: msg.into(),
        }
    }

    /// Whether this error represents cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Captured subprocess stderr, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Transcode { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }

    /// Message suitable for end users. Subprocess stderr is never included.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transcode { message, .. } => format!("Video processing failed: {message}"),
            Self::ChunkFailed { index, message } => {
                format!("Rendering failed for segment {}: {message}", index + 1)
            }
            Self::Timeout { message } => format!("Rendering took too long: {message}"),
            Self::ExportInProgress => {
                "Another export is already running. Wait for it to finish or cancel it.".to_string()
            }
            Self::Cancelled => "Export was cancelled.".to_string(),
            Self::Io(e) => format!("File system error: {e}"),
            other => other.to_string(),
        }
    }
}

/// Keep the last `max_bytes` of `text`, cut on a char boundary.
pub fn stderr_tail(text: &str, max_bytes: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max_bytes;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}
