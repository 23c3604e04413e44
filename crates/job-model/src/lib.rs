//! Framecast Job Model
//!
//! Defines the data contracts shared by the export engine, the CLI, and
//! renderer worker processes:
//! - **Job:** The declarative export description (clips, effects, output)
//! - **Chunk:** Frame-range plans and per-chunk results
//! - **Worker config & protocol:** What a renderer receives on startup and
//!   the JSON-lines messages it sends back
//! - **Progress:** Aggregated progress and final export results
//!
//! Frame ranges are half-open: a chunk covers `[start_frame, start_frame + frame_count)`.

pub mod chunk;
pub mod job;
pub mod progress;
pub mod protocol;
pub mod worker_config;

pub use chunk::*;
pub use job::*;
pub use progress::*;
pub use protocol::*;
pub use worker_config::*;
