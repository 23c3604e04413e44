//! Clock and timing utilities for export sessions.
//!
//! Throughput and ETA are computed against a monotonic clock anchored at
//! session start. This module provides:
//! - The session clock
//! - Whole-session throughput averaging
//! - A rate controller for throttling progress emission

use std::time::{Duration, Instant};

/// A session clock that provides monotonic elapsed time relative to
/// a fixed epoch (the moment the export started).
#[derive(Debug, Clone)]
pub struct SessionClock {
    /// The instant the session started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl SessionClock {
    /// Create a new session clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get milliseconds elapsed since session start.
    pub fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Get seconds elapsed since session start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at session start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Whole-session throughput estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Average frames per second since session start.
    pub fps: f64,
    /// Estimated seconds remaining, if any frames have been rendered.
    pub eta_secs: Option<f64>,
}

impl Throughput {
    /// Average rate over the whole session, not an instantaneous rate, so the
    /// displayed ETA does not jitter.
    pub fn from_totals(rendered_frames: u64, total_frames: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        if rendered_frames == 0 || secs <= 0.0 {
            return Self {
                fps: 0.0,
                eta_secs: None,
            };
        }
        let fps = rendered_frames as f64 / secs;
        let remaining = total_frames.saturating_sub(rendered_frames) as f64;
        Self {
            fps,
            eta_secs: Some(remaining / fps),
        }
    }
}

/// Rate controller for progress emission.
#[derive(Debug)]
pub struct RateController {
    target_interval_ms: u64,
    last_tick_ms: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ms: 1_000 / target_hz.max(1) as u64,
            last_tick_ms: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ms: u64) -> bool {
        match self.last_tick_ms {
            None => {
                self.last_tick_ms = Some(current_ms);
                true
            }
            Some(last) if current_ms >= last + self.target_interval_ms => {
                self.last_tick_ms = Some(current_ms);
                true
            }
            _ => false,
        }
    }

    /// Target interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.target_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = SessionClock::start();
        assert!(clock.elapsed_ms() < 1_000);
    }

    #[test]
    fn test_throughput_is_session_average() {
        let t = Throughput::from_totals(300, 900, Duration::from_secs(10));
        assert!((t.fps - 30.0).abs() < 1e-9);
        assert!((t.eta_secs.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_without_frames_has_no_eta() {
        let t = Throughput::from_totals(0, 900, Duration::from_secs(3));
        assert_eq!(t.fps, 0.0);
        assert!(t.eta_secs.is_none());
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(10);
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(50));
        assert!(ctrl.should_tick(100));
    }
}
