//! Chunk planner.
//!
//! Plans favour few, large chunks: each chunk costs a renderer start-up, so
//! parallelism is traded for stability.

use framecast_common::config::ExportPolicy;
use framecast_job_model::chunk::{Chunk, ChunkPlan};

/// Split `[0, total_frames)` into contiguous chunks of `chunk_size` frames.
/// The final chunk may be shorter. A zero `chunk_size` yields a single chunk.
pub fn build_chunk_plan(total_frames: u64, chunk_size: u64, fps: u32) -> ChunkPlan {
    if total_frames == 0 {
        return ChunkPlan {
            fps,
            total_frames,
            chunks: Vec::new(),
        };
    }
    if chunk_size == 0 || chunk_size >= total_frames {
        return ChunkPlan::single(total_frames, fps);
    }

    let mut chunks = Vec::with_capacity(total_frames.div_ceil(chunk_size) as usize);
    let mut start_frame = 0u64;
    while start_frame < total_frames {
        let frame_count = chunk_size.min(total_frames - start_frame);
        chunks.push(Chunk {
            index: chunks.len() as u32,
            start_frame,
            frame_count,
        });
        start_frame += frame_count;
    }

    ChunkPlan {
        fps,
        total_frames,
        chunks,
    }
}

/// Chunk size giving one chunk per `min_chunk_secs` of output, capped at
/// `max_chunks` chunks.
pub fn calculate_stable_chunk_size(total_frames: u64, duration_secs: f64, policy: &ExportPolicy) -> u64 {
    if total_frames == 0 {
        return 0;
    }
    let by_duration = if policy.min_chunk_secs > 0.0 {
        (duration_secs.max(0.0) / policy.min_chunk_secs).floor() as u64
    } else {
        1
    };
    let desired_chunks = by_duration.clamp(1, policy.max_chunks.max(1) as u64);
    total_frames.div_ceil(desired_chunks)
}
