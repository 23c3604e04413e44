//! Framecast CLI: export jobs, inspect plans, and manage proxies.
//!
//! Usage:
//!   framecast export <JOB>         Render a job description to video
//!   framecast plan <JOB>           Show how a job would be rendered
//!   framecast check                Check host capabilities and tools
//!   framecast proxy <ACTION>       Create, clear, or measure proxies
//!   framecast render-chunk         Renderer worker mode (used internally)

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use framecast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "framecast",
    about = "Chunked, cancellable video export for timeline projects",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a job description to video
    Export {
        /// Path to the job description (job.json)
        job: PathBuf,

        /// Output file path (overrides the job's output path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of renderer workers when rendering in parallel
        #[arg(long)]
        workers: Option<u32>,

        /// Render with a single worker
        #[arg(long)]
        sequential: bool,
    },

    /// Show the machine profile, chunk plan, and strategy for a job
    Plan {
        /// Path to the job description (job.json)
        job: PathBuf,

        /// Number of renderer workers when rendering in parallel
        #[arg(long)]
        workers: Option<u32>,

        /// Plan for a single worker
        #[arg(long)]
        sequential: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check host capabilities and external tools
    Check,

    /// Manage the proxy cache
    Proxy {
        #[command(subcommand)]
        action: ProxyAction,
    },

    /// Run as a renderer worker (reads one init line on stdin)
    #[command(hide = true)]
    RenderChunk,
}

#[derive(Subcommand)]
enum ProxyAction {
    /// Create (or reuse) a proxy for a media file
    Ensure {
        /// Source media file
        file: PathBuf,

        /// Proxy kind: preview|export|glow|scrub
        #[arg(long, default_value = "preview")]
        kind: String,
    },

    /// Delete cached proxies
    Clear {
        /// Only clear this kind: preview|export|glow|scrub
        #[arg(long)]
        kind: Option<String>,
    },

    /// Print the size of the proxy cache
    Size,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    framecast_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Export {
            job,
            output,
            workers,
            sequential,
        } => commands::export::run(config, job, output, workers, sequential).await,
        Commands::Plan {
            job,
            workers,
            sequential,
            json,
        } => commands::plan::run(&config, job, workers, sequential, json).await,
        Commands::Check => commands::check::run(&config).await,
        Commands::Proxy { action } => match action {
            ProxyAction::Ensure { file, kind } => commands::proxy::ensure(&config, file, &kind).await,
            ProxyAction::Clear { kind } => commands::proxy::clear(&config, kind.as_deref()).await,
            ProxyAction::Size => commands::proxy::size(&config).await,
        },
        Commands::RenderChunk => commands::render_chunk::run(&config).await,
    }
}
