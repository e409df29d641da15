//! Print the model request built for each annotated frame.

use std::path::PathBuf;

use samnotator_common::AppConfig;

use super::open_session;

pub fn run(config: &AppConfig, dir: PathBuf, frames: PathBuf) -> anyhow::Result<()> {
    let mut app = open_session(config, &dir, &frames)?;

    let annotated = app.annotations.frames_with_annotations();
    if annotated.is_empty() {
        println!("No annotated frames.");
        return Ok(());
    }

    for frame_id in annotated {
        app.frames.set_current_frame_id(Some(frame_id))?;
        match app.build_current_frame_request("prompts") {
            Ok(request) => {
                let entry = serde_json::json!({
                    "frame_id": frame_id,
                    "frame": app.frames.frame_load_info(frame_id)?,
                    "request": request,
                });
                println!("{}", serde_json::to_string_pretty(&entry)?);
            }
            Err(e) => {
                tracing::warn!(%frame_id, error = %e, "No prompt for frame");
            }
        }
    }

    Ok(())
}
