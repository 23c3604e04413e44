//! Framecast Common Utilities
//!
//! Shared infrastructure for all Framecast crates:
//! - Error types and result aliases
//! - Session clock and rate limiting for progress reporting
//! - Tracing/logging initialization
//! - Configuration loading, including the tunable export policy

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
