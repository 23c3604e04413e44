//! Machine profiler.
//!
//! Measures host capability once per export and derives the memory budget
//! the allocator works with. Query failures never surface as errors: the
//! profile falls back to conservative defaults instead.

use std::path::Path;

use serde::Serialize;
use sysinfo::System;

use framecast_common::config::ExportPolicy;

use crate::hardware::{detect_hardware_encoder, HardwareEncoder};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory assumed when the OS does not report a total.
pub const DEFAULT_MEMORY_GB: f64 = 4.0;

/// Host capability, computed once per export request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MachineProfile {
    pub cpu_cores: u32,
    pub total_memory_gb: f64,
    pub gpu_available: bool,
    pub hardware_encoder: Option<HardwareEncoder>,
    pub output_width: u32,
    pub output_height: u32,
}

impl MachineProfile {
    /// Build a profile from raw measurements, applying defaults for failed
    /// queries (zero cores or zero memory).
    pub fn from_measurements(
        cpu_cores: usize,
        total_memory_bytes: u64,
        hardware_encoder: Option<HardwareEncoder>,
        output_width: u32,
        output_height: u32,
    ) -> Self {
        let total_memory_gb = if total_memory_bytes == 0 {
            DEFAULT_MEMORY_GB
        } else {
            total_memory_bytes as f64 / BYTES_PER_GB
        };
        Self {
            cpu_cores: cpu_cores.max(1) as u32,
            total_memory_gb,
            gpu_available: hardware_encoder.is_some(),
            hardware_encoder,
            output_width,
            output_height,
        }
    }

    pub fn output_megapixels(&self) -> f64 {
        self.output_width as f64 * self.output_height as f64 / 1_000_000.0
    }
}

/// Profile the host for an output of `width`×`height`.
///
/// The GPU probe asks `ffmpeg` for hardware encoders; a missing binary
/// simply reports no GPU.
pub async fn profile_system(width: u32, height: u32, ffmpeg: &Path) -> MachineProfile {
    let cpu_cores = num_cpus::get();

    let mut system = System::new();
    system.refresh_memory();
    let total_memory_bytes = system.total_memory();

    let hardware_encoder = detect_hardware_encoder(ffmpeg).await;

    let profile = MachineProfile::from_measurements(
        cpu_cores,
        total_memory_bytes,
        hardware_encoder,
        width,
        height,
    );
    tracing::info!(
        cpu_cores = profile.cpu_cores,
        total_memory_gb = profile.total_memory_gb,
        gpu = profile.gpu_available,
        encoder = ?profile.hardware_encoder,
        "Machine profiled"
    );
    profile
}

/// Memory budget derived from a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryConstraints {
    /// Memory considered safely available for the export.
    pub effective_memory_gb: f64,
    /// Renderer video cache budget.
    pub video_cache_size_bytes: u64,
    worker_base_memory_gb: f64,
    memory_per_megapixel_gb: f64,
    parallel_safety_margin: f64,
}

impl MemoryConstraints {
    /// Whether parallel rendering of a job of this shape would likely exceed
    /// the memory budget.
    ///
    /// Peak usage is estimated from two renderer processes, each holding
    /// frames proportional to output megapixels (doubled at high frame
    /// rates) and growing slowly with duration.
    pub fn force_sequential(&self, duration_secs: f64, megapixels: f64, is_high_fps: bool) -> bool {
        let frame_load = megapixels * if is_high_fps { 2.0 } else { 1.0 };
        let duration_minutes = (duration_secs.max(0.0) / 60.0).min(10.0);
        let duration_load = 1.0 + duration_minutes * 0.1;
        let per_worker_gb =
            self.worker_base_memory_gb + frame_load * self.memory_per_megapixel_gb * duration_load;
        let parallel_peak_gb = per_worker_gb * 2.0;
        parallel_peak_gb > self.effective_memory_gb * self.parallel_safety_margin
    }

    /// Memory one renderer worker is assumed to need at this resolution.
    pub fn worker_memory_gb(&self, megapixels: f64) -> f64 {
        self.worker_base_memory_gb + megapixels * self.memory_per_megapixel_gb
    }
}

/// Derive the memory budget of a profile. Pure.
///
/// Less total memory and larger outputs both shrink the effective budget.
pub fn export_memory_constraints(profile: &MachineProfile, policy: &ExportPolicy) -> MemoryConstraints {
    let reserve = policy
        .os_reserve_gb
        .max(profile.total_memory_gb * policy.os_reserve_fraction);
    let mut effective = (profile.total_memory_gb - reserve).max(policy.min_effective_memory_gb);

    let megapixels = profile.output_megapixels();
    if megapixels > policy.high_res_megapixels {
        effective *= policy.high_res_memory_factor;
    } else if megapixels > policy.mid_res_megapixels {
        effective *= policy.mid_res_memory_factor;
    }

    let cache_mb = (effective * 1024.0 * policy.video_cache_fraction) as u64;
    let cache_mb = cache_mb.clamp(policy.min_video_cache_mb, policy.max_video_cache_mb);

    MemoryConstraints {
        effective_memory_gb: effective,
        video_cache_size_bytes: cache_mb * 1024 * 1024,
        worker_base_memory_gb: policy.worker_base_memory_gb,
        memory_per_megapixel_gb: policy.memory_per_megapixel_gb,
        parallel_safety_margin: policy.parallel_safety_margin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_failed_queries_use_defaults() {
        let profile = MachineProfile::from_measurements(0, 0, None, 1920, 1080);
        assert_eq!(profile.cpu_cores, 1);
        assert!((profile.total_memory_gb - DEFAULT_MEMORY_GB).abs() < 1e-9);
        assert!(!profile.gpu_available);
    }

    #[test]
    fn test_higher_resolution_lowers_effective_memory() {
        let policy = ExportPolicy::default();
        let hd = MachineProfile::from_measurements(8, 16 * GB, None, 1920, 1080);
        let uhd = MachineProfile::from_measurements(8, 16 * GB, None, 3840, 2160);
        let hd_mem = export_memory_constraints(&hd, &policy).effective_memory_gb;
        let uhd_mem = export_memory_constraints(&uhd, &policy).effective_memory_gb;
        assert!((hd_mem - 12.0).abs() < 1e-9);
        assert!(uhd_mem < hd_mem);
    }

    #[test]
    fn test_less_memory_lowers_effective_memory() {
        let policy = ExportPolicy::default();
        let small = MachineProfile::from_measurements(8, 8 * GB, None, 1920, 1080);
        let large = MachineProfile::from_measurements(8, 32 * GB, None, 1920, 1080);
        assert!(
            export_memory_constraints(&small, &policy).effective_memory_gb
                < export_memory_constraints(&large, &policy).effective_memory_gb
        );
    }

    #[test]
    fn test_video_cache_is_clamped() {
        let policy = ExportPolicy::default();
        let tiny = MachineProfile::from_measurements(2, 2 * GB, None, 1920, 1080);
        let huge = MachineProfile::from_measurements(64, 512 * GB, None, 1920, 1080);
        assert_eq!(
            export_memory_constraints(&tiny, &policy).video_cache_size_bytes,
            256 * 1024 * 1024
        );
        assert_eq!(
            export_memory_constraints(&huge, &policy).video_cache_size_bytes,
            2048 * 1024 * 1024
        );
    }

    #[test]
    fn test_4k60_five_minutes_on_small_machine_is_sequential() {
        let policy = ExportPolicy::default();
        let profile = MachineProfile::from_measurements(2, 8 * GB, None, 3840, 2160);
        let constraints = export_memory_constraints(&profile, &policy);
        assert!(constraints.force_sequential(300.0, profile.output_megapixels(), true));
    }

    #[test]
    fn test_short_hd_on_large_machine_is_not_forced() {
        let policy = ExportPolicy::default();
        let profile = MachineProfile::from_measurements(16, 32 * GB, None, 1920, 1080);
        let constraints = export_memory_constraints(&profile, &policy);
        assert!(!constraints.force_sequential(10.0, profile.output_megapixels(), false));
    }
}
