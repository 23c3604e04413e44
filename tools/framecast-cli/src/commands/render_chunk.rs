//! Renderer worker mode.
//!
//! Started by the export coordinator. Reads one init line on stdin and
//! writes protocol lines on stdout; logs go to stderr.

use std::time::Duration;

use framecast_common::config::AppConfig;
use framecast_export_engine::render::run_worker;
use framecast_export_engine::transcoder::FfmpegTranscoder;
use framecast_export_engine::CancelToken;

use super::shutdown_signal;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Renderer worker stopping");
        on_signal.cancel();
    });

    let transcoder = FfmpegTranscoder::new(
        config.tools.ffmpeg.clone(),
        Duration::from_millis(config.policy.kill_grace_ms),
    );
    let outcome = run_worker(tokio::io::stdin(), tokio::io::stdout(), &transcoder, &cancel).await;
    signal_task.abort();

    let failed = outcome?;
    if failed > 0 {
        tracing::warn!(failed, "Renderer worker finished with failed chunks");
    }
    Ok(())
}
