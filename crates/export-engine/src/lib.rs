//! Framecast Export Engine
//!
//! Turns an export job into a finished file on machines with limited memory
//! and mixed CPU/GPU capability, while staying cancellable.
//!
//! # Pipeline
//!
//! ```text
//! job.json ──► Profiler ──► Proxy Service ──► Chunk Planner ──► Allocator
//!                                                                   │
//!                  ┌────────────────────────────────────────────────┘
//!                  ▼
//!          Worker Coordinator ──► renderer workers (one process each)
//!                  │                     │ progress / result lines
//!                  │                     ▼
//!                  │              Progress Tracker ──► caller
//!                  ▼
//!           Chunk Combiner ──► output file
//! ```
//!
//! Rendering and transcoding always run in child processes. The
//! [`Transcoder`](transcoder::Transcoder) and
//! [`WorkerSpawner`](worker::WorkerSpawner) traits are the seams between the
//! engine and those processes.

pub mod allocator;
pub mod chunk_plan;
pub mod codec;
pub mod combiner;
pub mod coordinator;
pub mod fallback;
pub mod hardware;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod profiler;
pub mod proxy;
pub mod render;
pub mod session;
pub mod tracker;
pub mod transcoder;
pub mod worker;

#[cfg(test)]
mod testing;

pub use coordinator::{ChunkFailurePolicy, CoordinatorState, WorkerCoordinator};
pub use orchestrator::{plan_export, ExportOrchestrator, ExportOverrides, ExportPlan};
pub use proxy::{ProxyKind, ProxyOptions, ProxyResult, ProxyService};
pub use session::{CancelToken, ExportSession};
pub use tracker::{ProgressCallback, ProgressTracker};
