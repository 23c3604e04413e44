//! Show how a job would be rendered on this machine.

use std::path::PathBuf;

use framecast_common::config::AppConfig;
use framecast_export_engine::orchestrator::{Profiler, SystemProfiler};
use framecast_export_engine::{plan_export, ExportOverrides};
use framecast_job_model::job::ExportJob;

pub async fn run(
    config: &AppConfig,
    job_path: PathBuf,
    workers: Option<u32>,
    sequential: bool,
    json: bool,
) -> anyhow::Result<()> {
    let job = ExportJob::load(&job_path).map_err(|e| anyhow::anyhow!("Failed to load job: {e}"))?;
    job.validate()
        .map_err(|e| anyhow::anyhow!("Invalid job: {e}"))?;

    let profiler = SystemProfiler::new(config.tools.ffmpeg.clone());
    let profile = profiler.profile(job.output.width, job.output.height).await;
    let overrides = ExportOverrides {
        workers,
        sequential,
    };
    let plan = plan_export(&job, &profile, &config.policy, overrides)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Export plan for {}", job_path.display());
    println!("{}", "=".repeat(50));
    println!(
        "Machine: {} cores, {:.1} GB memory, GPU: {}",
        plan.profile.cpu_cores,
        plan.profile.total_memory_gb,
        plan.profile
            .hardware_encoder
            .map(|hw| hw.encoder_name())
            .unwrap_or("none")
    );
    println!(
        "Memory budget: {:.1} GB effective, {} MB video cache",
        plan.constraints.effective_memory_gb,
        plan.constraints.video_cache_size_bytes / (1024 * 1024)
    );
    println!(
        "Output: {}x{} @ {}fps, {} frames ({:.1}s)",
        job.output.width,
        job.output.height,
        job.output.fps,
        job.total_frames(),
        job.duration_secs()
    );
    println!();

    if plan.strategy.use_parallel {
        println!(
            "Strategy: parallel, {} workers x {} threads",
            plan.strategy.worker_count, plan.strategy.concurrency
        );
    } else {
        println!(
            "Strategy: sequential, {} threads ({})",
            plan.strategy.concurrency,
            if plan.sequential_reasons.is_empty() {
                "single chunk".to_string()
            } else {
                plan.sequential_reasons.join(", ")
            }
        );
    }
    println!("Timeout per chunk: {:.0}s", plan.strategy.timeout_ms as f64 / 1000.0);
    println!("Chunks:");
    for chunk in &plan.chunk_plan.chunks {
        println!(
            "  #{:<2} frames {:>6}..{:<6} ({:.1}s)",
            chunk.index,
            chunk.start_frame,
            chunk.end_frame(),
            chunk.duration_secs(job.output.fps)
        );
    }

    Ok(())
}
