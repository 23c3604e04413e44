//! Worker allocator: sequential vs. parallel, worker count, concurrency and
//! timeout for one export.

use serde::Serialize;

use framecast_common::config::ExportPolicy;
use framecast_job_model::job::Clip;

use crate::profiler::MachineProfile;

/// Job shape the allocator decides on.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInput {
    pub chunk_count: usize,
    pub total_frames: u64,
    pub fps: u32,
    pub effective_memory_gb: f64,
    pub megapixels: f64,
    /// Independent memory-pressure or decode-heavy verdicts.
    pub force_sequential: bool,
}

/// Execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportStrategy {
    pub use_parallel: bool,
    pub worker_count: u32,
    /// Per-worker encoder thread hint.
    pub concurrency: u32,
    /// Budget for rendering one chunk.
    pub timeout_ms: u64,
}

/// Decide how to run an export.
pub fn get_export_strategy(
    profile: &MachineProfile,
    input: &StrategyInput,
    policy: &ExportPolicy,
) -> ExportStrategy {
    let per_worker_gb = policy.worker_base_memory_gb + input.megapixels * policy.memory_per_megapixel_gb;
    let by_cores = profile.cpu_cores / policy.cores_per_worker.max(1);
    let by_memory = if per_worker_gb > 0.0 {
        (input.effective_memory_gb / per_worker_gb).floor() as u32
    } else {
        policy.max_workers
    };
    let chunk_count = input.chunk_count.min(u32::MAX as usize) as u32;

    let mut worker_count = by_cores
        .min(by_memory)
        .min(chunk_count)
        .min(policy.max_workers)
        .max(1);

    let memory_tight = input.effective_memory_gb < policy.min_parallel_memory_gb;
    let use_parallel =
        input.chunk_count > 1 && worker_count >= 2 && !input.force_sequential && !memory_tight;
    if !use_parallel {
        worker_count = 1;
    }

    let concurrency = (profile.cpu_cores / worker_count)
        .clamp(1, policy.max_concurrency.max(1));

    // Timeout covers the largest chunk the strategy will hand to one process.
    let frames_per_chunk = if use_parallel {
        input.total_frames.div_ceil(input.chunk_count.max(1) as u64)
    } else {
        input.total_frames
    };
    let timeout_ms = chunk_timeout_ms(frames_per_chunk, input.megapixels, policy);

    ExportStrategy {
        use_parallel,
        worker_count,
        concurrency,
        timeout_ms,
    }
}

/// Timeout for rendering `frames` output frames, scaling with the work.
pub fn chunk_timeout_ms(frames: u64, megapixels: f64, policy: &ExportPolicy) -> u64 {
    let estimated_secs = frames as f64 * megapixels.max(0.1) * policy.render_secs_per_megapixel_frame;
    let budget_secs = (estimated_secs * policy.timeout_safety_factor).max(policy.min_timeout_secs as f64);
    (budget_secs * 1000.0).ceil() as u64
}

/// Halve the worker count when zoom-driven proxies are large.
pub fn throttle_for_zoom(strategy: ExportStrategy, max_zoom: f64, policy: &ExportPolicy) -> ExportStrategy {
    if !strategy.use_parallel || max_zoom < policy.zoom_throttle_scale {
        return strategy;
    }
    let worker_count = (strategy.worker_count / 2).max(1);
    tracing::info!(
        from = strategy.worker_count,
        to = worker_count,
        max_zoom,
        "Throttling workers for zoomed sources"
    );
    ExportStrategy {
        use_parallel: worker_count >= 2,
        worker_count,
        ..strategy
    }
}

/// Whether the sources are too expensive to decode in parallel: several
/// very large sources, or any high-frame-rate one.
pub fn is_decode_heavy(clips: &[Clip], policy: &ExportPolicy) -> bool {
    let heavy: Vec<&Clip> = clips
        .iter()
        .filter(|clip| {
            clip.source_megapixels()
                .is_some_and(|mp| mp >= policy.decode_heavy_megapixels)
        })
        .collect();
    let high_fps = heavy
        .iter()
        .any(|clip| clip.source_fps.is_some_and(|fps| fps >= policy.high_fps_threshold));
    heavy.len() >= policy.decode_heavy_source_count.max(1) || high_fps
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const GB: u64 = 1024 * 1024 * 1024;

    fn input(chunks: usize, effective: f64) -> StrategyInput {
        StrategyInput {
            chunk_count: chunks,
            total_frames: 1200,
            fps: 30,
            effective_memory_gb: effective,
            megapixels: 2.07,
            force_sequential: false,
        }
    }

    #[test]
    fn test_single_chunk_is_sequential() {
        let policy = ExportPolicy::default();
        let profile = MachineProfile::from_measurements(16, 32 * GB, None, 1920, 1080);
        let strategy = get_export_strategy(&profile, &input(1, 24.0), &policy);
        assert!(!strategy.use_parallel);
        assert_eq!(strategy.worker_count, 1);
    }

    #[test]
    fn test_large_machine_goes_parallel() {
        let policy = ExportPolicy::default();
        let profile = MachineProfile::from_measurements(16, 32 * GB, None, 1920, 1080);
        let strategy = get_export_strategy(&profile, &input(4, 24.0), &policy);
        assert!(strategy.use_parallel);
        assert_eq!(strategy.worker_count, 4);
        assert_eq!(strategy.concurrency, 4);
    }

    #[test]
    fn test_tight_memory_is_sequential() {
        let policy = ExportPolicy::default();
        let profile = MachineProfile::from_measurements(16, 6 * GB, None, 1920, 1080);
        let strategy = get_export_strategy(&profile, &input(4, 3.0), &policy);
        assert!(!strategy.use_parallel);
    }

    #[test]
    fn test_force_sequential_wins() {
        let policy = ExportPolicy::default();
        let profile = MachineProfile::from_measurements(16, 32 * GB, None, 1920, 1080);
        let mut forced = input(4, 24.0);
        forced.force_sequential = true;
        assert!(!get_export_strategy(&profile, &forced, &policy).use_parallel);
    }

    #[test]
    fn test_timeout_scales_with_chunk_length() {
        let policy = ExportPolicy::default();
        let short = chunk_timeout_ms(100, 8.3, &policy);
        let long = chunk_timeout_ms(18_000, 8.3, &policy);
        assert_eq!(short, policy.min_timeout_secs * 1000);
        assert!(long > short * 10);
    }

    #[test]
    fn test_zoom_throttle_halves_workers() {
        let policy = ExportPolicy::default();
        let strategy = ExportStrategy {
            use_parallel: true,
            worker_count: 4,
            concurrency: 2,
            timeout_ms: 1,
        };
        assert_eq!(throttle_for_zoom(strategy, 2.5, &policy).worker_count, 2);
        assert_eq!(throttle_for_zoom(strategy, 1.2, &policy).worker_count, 4);
        let two = ExportStrategy {
            worker_count: 2,
            ..strategy
        };
        assert!(!throttle_for_zoom(two, 3.0, &policy).use_parallel);
    }

    #[test]
    fn test_decode_heavy_detection() {
        let policy = ExportPolicy::default();
        let clip = |w: u32, h: u32, fps: f64| Clip {
            id: "c".to_string(),
            source: PathBuf::from("/m/c.mp4"),
            timeline_start_secs: 0.0,
            source_in_secs: 0.0,
            duration_secs: 1.0,
            source_width: Some(w),
            source_height: Some(h),
            source_fps: Some(fps),
            has_audio: true,
        };
        assert!(!is_decode_heavy(&[clip(3840, 2160, 30.0)], &policy));
        assert!(is_decode_heavy(&[clip(3840, 2160, 60.0)], &policy));
        assert!(is_decode_heavy(
            &[clip(3840, 2160, 30.0), clip(3840, 2160, 24.0)],
            &policy
        ));
        assert!(!is_decode_heavy(&[clip(1920, 1080, 60.0)], &policy));
    }
}
