//! Samnotator CLI: inspect and segment annotation projects without the GUI.
//!
//! Usage:
//!   samnotator-cli info <DIR>                        Show project contents
//!   samnotator-cli validate <DIR>                    Check a project file
//!   samnotator-cli prompts <DIR> --frames <PATH>     Print model prompts per frame
//!   samnotator-cli segment <DIR> --frames <PATH> --model <NAME> [--video]
//!   samnotator-cli models                            List configured models

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use samnotator_common::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "samnotator-cli",
    about = "Point and box annotation with SAM3 prompts",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/samnotator/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show project information
    Info {
        /// Project directory (holds annotations.json)
        dir: PathBuf,
    },

    /// Validate a project file
    Validate {
        /// Project directory
        dir: PathBuf,
    },

    /// Print the model prompt of every annotated frame as JSON
    Prompts {
        /// Project directory
        dir: PathBuf,

        /// Image or folder of images the project was annotated on
        #[arg(long)]
        frames: PathBuf,
    },

    /// Run a model on the project's prompts and save the detections
    Segment {
        /// Project directory
        dir: PathBuf,

        /// Image or folder of images the project was annotated on
        #[arg(long)]
        frames: PathBuf,

        /// Model display name from the config, or a backend name
        #[arg(short, long)]
        model: String,

        /// Model directory, overriding the configured one
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Propagate through the whole sequence instead of frame by frame
        #[arg(long)]
        video: bool,

        /// Seconds to wait for each request
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// List configured models
    Models,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    samnotator_common::logging::init_logging(&samnotator_common::logging::verbose_override(
        &config.logging,
        cli.verbose,
    ));

    match cli.command {
        Commands::Info { dir } => commands::info::run(dir),
        Commands::Validate { dir } => commands::validate::run(dir),
        Commands::Prompts { dir, frames } => commands::prompts::run(&config, dir, frames),
        Commands::Segment {
            dir,
            frames,
            model,
            model_path,
            video,
            timeout,
        } => commands::segment::run(&config, dir, frames, model, model_path, video, timeout),
        Commands::Models => commands::models::run(&config),
    }
}
