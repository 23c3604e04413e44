//! Render a job description to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use framecast_common::config::AppConfig;
use framecast_export_engine::{ExportOrchestrator, ExportOverrides, ProgressCallback};
use framecast_job_model::job::ExportJob;
use framecast_job_model::progress::{ExportProgress, ExportResult};

use super::{human_bytes, shutdown_signal};

pub async fn run(
    config: AppConfig,
    job_path: PathBuf,
    output: Option<PathBuf>,
    workers: Option<u32>,
    sequential: bool,
) -> anyhow::Result<()> {
    let mut job =
        ExportJob::load(&job_path).map_err(|e| anyhow::anyhow!("Failed to load job: {e}"))?;
    if let Some(output) = output {
        job.output.path = output;
    }

    println!("Exporting job: {}", job_path.display());
    println!("  Output: {}", job.output.path.display());
    println!(
        "  Format: {:?} {}x{} @ {}fps",
        job.output.format, job.output.width, job.output.height, job.output.fps
    );
    println!("  Clips: {}", job.clips.len());

    let orchestrator = Arc::new(
        ExportOrchestrator::from_config(config)
            .await?
            .with_overrides(ExportOverrides {
                workers,
                sequential,
            }),
    );

    let canceller = Arc::clone(&orchestrator);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        eprintln!("\nCancelling export...");
        canceller.cancel_export();
    });

    let progress_cb: ProgressCallback = Arc::new(|p: ExportProgress| {
        let mut line = format!("\r  [{:<10}] {:5.1}%", p.stage.as_str(), p.progress);
        if let (Some(current), Some(total)) = (p.current_frame, p.total_frames) {
            line.push_str(&format!(" ({current}/{total} frames"));
            if let Some(fps) = p.fps {
                line.push_str(&format!(", {fps:.1} fps"));
            }
            if let Some(eta) = p.eta_secs {
                line.push_str(&format!(", ETA {eta:.0}s"));
            }
            line.push(')');
        }
        print!("{line}   ");
        let _ = std::io::stdout().flush();
    });

    let result = orchestrator.export(&job, Some(progress_cb)).await;
    signal_task.abort();

    match result {
        ExportResult::Completed {
            output_path,
            file_size,
        } => {
            println!(
                "\nExport complete: {} ({})",
                output_path.display(),
                human_bytes(file_size)
            );
            Ok(())
        }
        ExportResult::Cancelled => {
            println!("\nExport cancelled.");
            Ok(())
        }
        ExportResult::Failed { error } => Err(anyhow::anyhow!("Export failed: {error}")),
    }
}
