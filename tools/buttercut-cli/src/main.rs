//! Buttercut CLI: submit, render, and inspect overlay render jobs.
//!
//! Usage:
//!   buttercut submit <VIDEO>     Queue a video with an overlay list
//!   buttercut process <JOB_ID>   Render a queued job
//!   buttercut status <JOB_ID>    Show job status and overlay metadata
//!   buttercut result <JOB_ID>    Print the rendered file path
//!   buttercut plan <VIDEO>       Print the ffmpeg command without running it
//!   buttercut probe <VIDEO>      Show source duration and geometry
//!   buttercut check              Check encoder tools and storage

use std::path::PathBuf;

use buttercut_common::config::{config_file_path, AppConfig};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "buttercut",
    about = "Burn text, image, and video overlays into videos",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit structured JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Override the storage directory
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a video into storage and queue a render job
    Submit {
        /// Source video
        video: PathBuf,

        /// Overlay list as inline JSON, or @path to a JSON file
        #[arg(short, long)]
        overlays: Option<String>,

        /// Render the job right away
        #[arg(long)]
        run: bool,
    },

    /// Render a queued job (Ctrl-C cancels)
    Process {
        /// Job identifier
        job_id: String,
    },

    /// Show job status
    Status {
        /// Job identifier
        job_id: String,
    },

    /// Print the rendered output path of a finished job
    Result {
        /// Job identifier
        job_id: String,
    },

    /// Validate overlays and print the encoder command
    Plan {
        /// Source video
        video: PathBuf,

        /// Overlay list as inline JSON, or @path to a JSON file
        #[arg(short, long)]
        overlays: Option<String>,

        /// Output file path
        #[arg(short = 'O', long, default_value = "output.mp4")]
        output: PathBuf,
    },

    /// Probe a video's duration and dimensions
    Probe {
        /// Source video
        video: PathBuf,
    },

    /// Check encoder tools and storage
    Check {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write_config: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, config_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::fallback(), Some(e)),
    };
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    buttercut_common::logging::init_logging(&logging);

    if let Some(e) = config_error {
        tracing::warn!(
            path = %config_file_path().display(),
            error = %e,
            "Ignoring unusable config file, using defaults"
        );
    }

    tracing::debug!(storage_dir = %config.storage_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Submit {
            video,
            overlays,
            run,
        } => commands::submit::run(&config, video, overlays, run).await,
        Commands::Process { job_id } => commands::process::run(&config, &job_id).await,
        Commands::Status { job_id } => commands::status::run(&config, &job_id),
        Commands::Result { job_id } => commands::result::run(&config, &job_id),
        Commands::Plan {
            video,
            overlays,
            output,
        } => commands::plan::run(&config, video, overlays, output).await,
        Commands::Probe { video } => commands::probe::run(&config, video).await,
        Commands::Check { write_config } => commands::check::run(&config, write_config).await,
    }
}
