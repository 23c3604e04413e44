//! Chunk plans and per-chunk results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A contiguous frame range rendered independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in rendering/combination order.
    pub index: u32,
    /// First frame of the range.
    pub start_frame: u64,
    /// Number of frames in the range.
    pub frame_count: u64,
}

impl Chunk {
    /// One past the last frame of the range.
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frame_count
    }

    /// Start time in seconds at the given frame rate.
    pub fn start_secs(&self, fps: u32) -> f64 {
        self.start_frame as f64 / fps.max(1) as f64
    }

    /// Duration in seconds at the given frame rate.
    pub fn duration_secs(&self, fps: u32) -> f64 {
        self.frame_count as f64 / fps.max(1) as f64
    }
}

/// Ordered chunks covering `[0, total_frames)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub fps: u32,
    pub total_frames: u64,
    pub chunks: Vec<Chunk>,
}

impl ChunkPlan {
    /// A plan with one chunk spanning the full range.
    pub fn single(total_frames: u64, fps: u32) -> Self {
        Self {
            fps,
            total_frames,
            chunks: vec![Chunk {
                index: 0,
                start_frame: 0,
                frame_count: total_frames,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the plan is a single full-range chunk.
    pub fn is_single(&self) -> bool {
        self.chunks.len() == 1
    }

    /// Collapse to a single chunk spanning the full range.
    pub fn collapsed(&self) -> Self {
        Self::single(self.total_frames, self.fps)
    }

    /// Largest chunk, in frames.
    pub fn max_chunk_frames(&self) -> u64 {
        self.chunks.iter().map(|c| c.frame_count).max().unwrap_or(0)
    }

    /// Check coverage: contiguous, non-overlapping, index-ordered, and
    /// summing exactly to `total_frames`.
    pub fn check_coverage(&self) -> Result<(), String> {
        let mut expected_start = 0u64;
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index as usize != position {
                return Err(format!(
                    "chunk at position {position} has index {}",
                    chunk.index
                ));
            }
            if chunk.start_frame != expected_start {
                return Err(format!(
                    "chunk {} starts at {} but previous ended at {expected_start}",
                    chunk.index, chunk.start_frame
                ));
            }
            if chunk.frame_count == 0 {
                return Err(format!("chunk {} is empty", chunk.index));
            }
            expected_start = chunk.end_frame();
        }
        if expected_start != self.total_frames {
            return Err(format!(
                "chunks cover {expected_start} frames, expected {}",
                self.total_frames
            ));
        }
        Ok(())
    }
}

/// Outcome of rendering one chunk. Produced exactly once per chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub index: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn ok(index: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            success: true,
            path: Some(path.into()),
            error: None,
        }
    }

    pub fn failed(index: u32, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            path: None,
            error: Some(error.into()),
        }
    }
}
