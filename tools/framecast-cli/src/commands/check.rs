//! Check host capabilities and external tools.

use framecast_common::config::AppConfig;
use framecast_export_engine::process::command_exists;
use framecast_export_engine::profiler::{export_memory_constraints, profile_system};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Framecast System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg_ok = command_exists(&config.tools.ffmpeg);
    let ffprobe_ok = command_exists(&config.tools.ffprobe);
    report(ffmpeg_ok, &format!("Transcoder: {}", config.tools.ffmpeg.display()));
    report(ffprobe_ok, &format!("Prober: {}", config.tools.ffprobe.display()));

    let renderer = match &config.renderer.program {
        Some(program) => program.clone(),
        None => std::env::current_exe()?,
    };
    report(
        command_exists(&renderer),
        &format!("Renderer: {} {}", renderer.display(), config.renderer.args.join(" ")),
    );

    let profile = profile_system(1920, 1080, &config.tools.ffmpeg).await;
    println!("[OK] CPU cores: {}", profile.cpu_cores);
    println!("[OK] Memory: {:.1} GB", profile.total_memory_gb);
    match profile.hardware_encoder {
        Some(hw) => println!("[OK] Hardware encoder: {}", hw.encoder_name()),
        None => println!("[--] Hardware encoder: none (software encoding only)"),
    }

    let constraints = export_memory_constraints(&profile, &config.policy);
    println!(
        "     1080p budget: {:.1} GB effective, {:.1} GB per worker",
        constraints.effective_memory_gb,
        constraints.worker_memory_gb(profile.output_megapixels())
    );

    println!();
    if ffmpeg_ok && ffprobe_ok {
        println!("All required tools are available. Framecast is ready.");
    } else {
        println!("Some required tools are missing. Install ffmpeg or set tools paths in the config.");
    }
    Ok(())
}

fn report(ok: bool, label: &str) {
    if ok {
        println!("[OK] {label}");
    } else {
        println!("[MISSING] {label}");
    }
}
