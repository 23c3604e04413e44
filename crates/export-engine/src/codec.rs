//! Encoder arguments per output format.

use framecast_job_model::job::ExportFormat;
use framecast_job_model::worker_config::CodecSettings;

/// Frame rate GIF output is resampled to.
pub const GIF_FPS: u32 = 15;

/// Video and audio encoder arguments for a chunk or a full render.
///
/// `threads` is the per-worker concurrency hint; 0 lets the encoder decide.
pub fn codec_args(codec: &CodecSettings, threads: u32) -> Vec<String> {
    let video_bitrate = format!("{}k", codec.video_bitrate_kbps.max(500));
    let max_rate = format!("{}k", codec.video_bitrate_kbps.max(500) * 3 / 2);
    let buf_size = format!("{}k", codec.video_bitrate_kbps.max(500) * 2);
    let audio_bitrate = format!("{}k", codec.audio_bitrate_kbps.max(64));
    let crf = codec.quality.crf().to_string();
    let preset = codec.quality.encoder_preset().to_string();

    let mut args: Vec<String> = match codec.format {
        ExportFormat::Mp4H264 => vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            preset,
            "-profile:v".into(),
            "high".into(),
            "-crf".into(),
            crf,
            "-maxrate".into(),
            max_rate,
            "-bufsize".into(),
            buf_size,
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            audio_bitrate,
            "-movflags".into(),
            "+faststart".into(),
        ],
        ExportFormat::Mp4H265 => vec![
            "-c:v".into(),
            "libx265".into(),
            "-preset".into(),
            preset,
            "-crf".into(),
            crf,
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-tag:v".into(),
            "hvc1".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            audio_bitrate,
            "-movflags".into(),
            "+faststart".into(),
        ],
        ExportFormat::Webm => vec![
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-b:v".into(),
            video_bitrate,
            "-crf".into(),
            (codec.quality.crf() + 8).to_string(),
            "-row-mt".into(),
            "1".into(),
            "-c:a".into(),
            "libopus".into(),
            "-b:a".into(),
            format!("{}k", codec.audio_bitrate_kbps.clamp(64, 256)),
        ],
        ExportFormat::Gif => vec!["-an".into(), "-loop".into(), "0".into()],
    };

    if threads > 0 && codec.format != ExportFormat::Gif {
        args.push("-threads".into());
        args.push(threads.to_string());
    }
    args
}

/// Palette filter chain turning `[input]` into GIF frames at `[output]`.
pub fn gif_palette_filter(input: &str, output: &str) -> String {
    format!(
        "[{input}]fps={GIF_FPS},split[gif_a][gif_b];[gif_a]palettegen=stats_mode=diff[gif_pal];[gif_b][gif_pal]paletteuse=dither=bayer[{output}]"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_job_model::job::QualityPreset;

    fn settings(format: ExportFormat) -> CodecSettings {
        CodecSettings {
            format,
            quality: QualityPreset::High,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
        }
    }

    #[test]
    fn test_h264_uses_quality_preset() {
        let args = codec_args(&settings(ExportFormat::Mp4H264), 4);
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "18"));
        assert!(args.windows(2).any(|w| w[0] == "-preset" && w[1] == "slow"));
        assert!(args.windows(2).any(|w| w[0] == "-threads" && w[1] == "4"));
    }

    #[test]
    fn test_gif_has_no_audio_or_threads() {
        let args = codec_args(&settings(ExportFormat::Gif), 4);
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-threads".to_string()));
        assert!(gif_palette_filter("v", "out").ends_with("[out]"));
    }
}
