//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory for per-export scratch files (chunk outputs, manifests).
    pub work_dir: PathBuf,

    /// Directory holding the persistent proxy cache.
    pub proxy_cache_dir: PathBuf,

    /// External tool locations.
    pub tools: ToolPaths,

    /// How renderer workers are launched.
    pub renderer: RendererConfig,

    /// Tunable export policy.
    pub policy: ExportPolicy,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Paths to the external transcoding engine and media prober.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

/// Renderer worker launch command.
///
/// When `program` is `None` the current executable is used, which is the
/// `framecast` binary with its `render-chunk` subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Memory, allocation, and validation thresholds used by the export engine.
///
/// These are empirically tuned numbers, not invariants. They are kept in
/// config so they can be validated against the hardware actually in use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportPolicy {
    /// Memory always left to the OS and the UI process (GB).
    pub os_reserve_gb: f64,
    /// Fraction of total memory reserved when larger than `os_reserve_gb`.
    pub os_reserve_fraction: f64,
    /// Floor for effective memory (GB).
    pub min_effective_memory_gb: f64,

    /// Output megapixels at which the high-resolution penalty applies (4K).
    pub high_res_megapixels: f64,
    pub high_res_memory_factor: f64,
    /// Output megapixels at which the mid-resolution penalty applies (1440p).
    pub mid_res_megapixels: f64,
    pub mid_res_memory_factor: f64,

    /// Baseline memory of one renderer process (GB).
    pub worker_base_memory_gb: f64,
    /// Additional renderer memory per output megapixel (GB).
    pub memory_per_megapixel_gb: f64,
    /// Frame rate at or above which a job counts as high-fps.
    pub high_fps_threshold: f64,
    /// Fraction of effective memory parallel rendering may use.
    pub parallel_safety_margin: f64,

    /// Fraction of effective memory given to the renderer's video cache.
    pub video_cache_fraction: f64,
    pub min_video_cache_mb: u64,
    pub max_video_cache_mb: u64,

    /// Hard cap on concurrent renderer processes.
    pub max_workers: u32,
    /// Effective memory below which rendering is always sequential (GB).
    pub min_parallel_memory_gb: f64,
    /// CPU cores assumed per renderer process.
    pub cores_per_worker: u32,
    /// Upper bound on the per-worker concurrency hint.
    pub max_concurrency: u32,

    /// Estimated render cost per output frame per megapixel (seconds).
    pub render_secs_per_megapixel_frame: f64,
    /// Multiplier applied to estimated render time to obtain a timeout.
    pub timeout_safety_factor: f64,
    /// Lower bound for any renderer timeout (seconds).
    pub min_timeout_secs: u64,

    /// Shortest chunk worth a separate renderer process (seconds).
    pub min_chunk_secs: f64,
    /// Upper bound on chunk count.
    pub max_chunks: u32,

    /// Source megapixels at which a clip is decode-heavy.
    pub decode_heavy_megapixels: f64,
    /// Number of decode-heavy sources that forces sequential rendering.
    pub decode_heavy_source_count: usize,

    /// Zoom scale at which the worker count is halved.
    pub zoom_throttle_scale: f64,

    /// A source gets an export proxy when wider than output × zoom × factor.
    pub proxy_width_factor: f64,

    /// Combined output smaller than this fraction of the inputs is corrupt.
    pub min_combined_ratio: f64,

    /// Grace period between a graceful stop and a forced kill (ms).
    pub kill_grace_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "framecast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("framecast").join("work"),
            proxy_cache_dir: default_cache_dir().join("proxies"),
            tools: ToolPaths::default(),
            renderer: RendererConfig::default(),
            policy: ExportPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec!["render-chunk".to_string()],
        }
    }
}

impl Default for ExportPolicy {
    fn default() -> Self {
        Self {
            os_reserve_gb: 3.0,
            os_reserve_fraction: 0.25,
            min_effective_memory_gb: 1.0,
            high_res_megapixels: 8.0,
            high_res_memory_factor: 0.75,
            mid_res_megapixels: 3.5,
            mid_res_memory_factor: 0.85,
            worker_base_memory_gb: 1.0,
            memory_per_megapixel_gb: 0.25,
            high_fps_threshold: 50.0,
            parallel_safety_margin: 0.8,
            video_cache_fraction: 0.1,
            min_video_cache_mb: 256,
            max_video_cache_mb: 2048,
            max_workers: 4,
            min_parallel_memory_gb: 4.0,
            cores_per_worker: 2,
            max_concurrency: 8,
            render_secs_per_megapixel_frame: 0.02,
            timeout_safety_factor: 4.0,
            min_timeout_secs: 120,
            min_chunk_secs: 10.0,
            max_chunks: 4,
            decode_heavy_megapixels: 8.0,
            decode_heavy_source_count: 2,
            zoom_throttle_scale: 2.0,
            proxy_width_factor: 1.5,
            min_combined_ratio: 0.05,
            kill_grace_ms: 3000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("framecast").join("config.json")
}

/// Default cache directory.
fn default_cache_dir() -> PathBuf {
    let base = std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".cache")
        });
    base.join("framecast")
}
