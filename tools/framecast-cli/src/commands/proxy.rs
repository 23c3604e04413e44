//! Proxy cache commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use framecast_common::config::AppConfig;
use framecast_export_engine::hardware::detect_hardware_encoder;
use framecast_export_engine::probe::FfprobeProber;
use framecast_export_engine::transcoder::FfmpegTranscoder;
use framecast_export_engine::{CancelToken, ProxyKind, ProxyOptions, ProxyService};

use super::{human_bytes, shutdown_signal};

async fn service(config: &AppConfig) -> ProxyService {
    let grace = Duration::from_millis(config.policy.kill_grace_ms);
    ProxyService::new(
        config.proxy_cache_dir.clone(),
        Arc::new(FfmpegTranscoder::new(config.tools.ffmpeg.clone(), grace)),
        Arc::new(FfprobeProber::new(config.tools.ffprobe.clone())),
        detect_hardware_encoder(&config.tools.ffmpeg).await,
    )
}

fn parse_kind(kind: &str) -> anyhow::Result<ProxyKind> {
    ProxyKind::parse(kind)
        .ok_or_else(|| anyhow::anyhow!("Unknown proxy kind: {kind}. Use: preview, export, glow, scrub"))
}

pub async fn ensure(config: &AppConfig, file: PathBuf, kind: &str) -> anyhow::Result<()> {
    let kind = parse_kind(kind)?;
    let proxies = service(config).await;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    println!("Ensuring {kind} proxy for {}", file.display());
    let result = proxies
        .ensure_proxy(&file, &ProxyOptions::new(kind), &cancel)
        .await;
    signal_task.abort();

    if result.skipped {
        println!("Skipped: source is already small enough");
        return Ok(());
    }
    match (result.success, result.proxy_path) {
        (true, Some(path)) => {
            println!("Proxy ready: {}", path.display());
            Ok(())
        }
        _ => Err(anyhow::anyhow!(
            "Proxy generation failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}

pub async fn clear(config: &AppConfig, kind: Option<&str>) -> anyhow::Result<()> {
    let proxies = service(config).await;
    let removed = match kind {
        Some(kind) => proxies.clear_proxies_of_type(parse_kind(kind)?)?,
        None => proxies.clear_all()?,
    };
    println!("Removed {removed} cached proxies from {}", proxies.cache_dir().display());
    Ok(())
}

pub async fn size(config: &AppConfig) -> anyhow::Result<()> {
    let proxies = service(config).await;
    let bytes = proxies.cache_size();
    println!("{} ({bytes} bytes) in {}", human_bytes(bytes), proxies.cache_dir().display());
    Ok(())
}
