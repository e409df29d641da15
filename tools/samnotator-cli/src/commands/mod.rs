pub mod info;
pub mod models;
pub mod prompts;
pub mod segment;
pub mod validate;

use std::path::Path;

use samnotator_common::AppConfig;
use samnotator_controllers::AppController;

/// Session with `frames` open and the project in `dir` loaded onto them.
pub(crate) fn open_session(
    config: &AppConfig,
    dir: &Path,
    frames: &Path,
) -> anyhow::Result<AppController> {
    let mut app = AppController::new(config);
    app.open_path(frames)
        .map_err(|e| anyhow::anyhow!("Failed to open frames at {}: {e}", frames.display()))?;
    app.load_from_folder(dir)
        .map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    app.process_events();
    Ok(app)
}
