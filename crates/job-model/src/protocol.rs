//! Renderer worker wire protocol.
//!
//! A worker receives one [`WorkerInit`] JSON line on stdin and answers with
//! JSON lines on stdout, each a [`WorkerMessage`] of the form
//! `{"type": "progress" | "result", "data": ...}`. Anything else a worker
//! prints on stdout is ignored by the coordinator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkResult};
use crate::progress::ExportStage;
use crate::worker_config::ExportJobConfig;

/// Startup payload of a renderer worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInit {
    /// Index of this worker within the export.
    pub worker_index: u32,

    /// Shared export settings.
    pub config: ExportJobConfig,

    /// Chunks this worker renders, in order.
    pub assignments: Vec<ChunkAssignment>,
}

/// One chunk assigned to a worker and where to write it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAssignment {
    pub chunk: Chunk,
    pub output_path: PathBuf,
}

/// Progress of one chunk inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub chunk_index: u32,
    pub rendered_frames: u64,
    pub total_frames: u64,
    pub stage: ExportStage,
}

/// Message from a worker to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress(ChunkProgress),
    Result(ChunkResult),
}

impl WorkerMessage {
    /// Serialize as a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one stdout line. Returns `None` for lines that are not messages.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}
