use std::path::PathBuf;

use clap::Parser;
use eframe::egui;
use samnotator_common::logging::{init_logging, verbose_override};
use samnotator_common::AppConfig;

mod app;
mod canvas;
mod panels;

use app::AnnotatorApp;

#[derive(Parser)]
#[command(
    name = "samnotator",
    about = "Annotate images and video frames with SAM3 point and box prompts",
    version
)]
struct Args {
    /// Image or folder of images to open
    #[arg(long)]
    path: Option<PathBuf>,

    /// Config file (defaults to $XDG_CONFIG_HOME/samnotator/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    init_logging(&verbose_override(&config.logging, args.verbose));

    if let Some(path) = args.path.as_ref() {
        if !path.exists() {
            eprintln!("Error: path does not exist: {}", path.display());
            std::process::exit(1);
        }
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Samnotator")
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([640.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Samnotator",
        options,
        Box::new(move |_cc| Box::new(AnnotatorApp::new(config, args.path))),
    )
    .map_err(|e| anyhow::anyhow!("annotator launch failed: {e}"))
}
