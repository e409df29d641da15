//! Run a model over a project's prompts and store the detections.

use std::path::PathBuf;
use std::time::Duration;

use samnotator_common::{AppConfig, ModelKind};
use samnotator_inference::{InferenceRequest, ModelInfo, PvsVideoOptions};

use super::open_session;

fn resolve_model(
    config: &AppConfig,
    model: &str,
    model_path: Option<PathBuf>,
    video: bool,
) -> ModelInfo {
    let mut info = match config.model_named(model) {
        Some(entry) => ModelInfo::from(entry),
        None => ModelInfo {
            kind: if video { ModelKind::Video } else { ModelKind::Image },
            name: model.to_string(),
            wrapper_name: model.to_string(),
            model_path: PathBuf::from("."),
        },
    };
    if let Some(path) = model_path {
        info.model_path = path;
    }
    info
}

pub fn run(
    config: &AppConfig,
    dir: PathBuf,
    frames: PathBuf,
    model: String,
    model_path: Option<PathBuf>,
    video: bool,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let mut app = open_session(config, &dir, &frames)?;
    let info = resolve_model(config, &model, model_path, video);
    let timeout = Duration::from_secs(timeout_secs);

    println!(
        "Loading {} ({}) from {}",
        info.name,
        info.wrapper_name,
        info.model_path.display()
    );
    app.load_model(&info)
        .map_err(|e| anyhow::anyhow!("Failed to load model: {e}"))?;

    let requests: Vec<InferenceRequest> = if video {
        vec![app
            .build_sequence_request(&info.name, PvsVideoOptions::default())
            .map_err(|e| anyhow::anyhow!("Failed to build request: {e}"))?]
    } else {
        let mut requests = Vec::new();
        for frame_id in app.annotations.frames_with_annotations() {
            app.frames.set_current_frame_id(Some(frame_id))?;
            match app.build_current_frame_request(&info.name) {
                Ok(request) => requests.push(request),
                Err(e) => tracing::warn!(%frame_id, error = %e, "Skipping frame"),
            }
        }
        requests
    };

    if requests.is_empty() {
        println!("Nothing to segment: no annotated frames.");
        return Ok(());
    }

    let mut stored = 0;
    let mut failed = 0;
    for request in requests {
        let request_id = app.submit(request)?;
        let result = app
            .model
            .wait_for(&request_id, timeout)
            .map_err(|e| anyhow::anyhow!("Inference failed: {e}"))?;
        if let Some(error) = result.output.error.as_deref() {
            println!("  {request_id}: failed: {error}");
            failed += 1;
            continue;
        }
        let count = app.apply_inference_result(&result);
        println!("  {request_id}: {count} detection(s)");
        stored += count;
    }
    app.process_events();
    app.model.unload_model();

    let path = app
        .save_to_folder(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;
    println!(
        "\nStored {stored} detection(s) in {} ({failed} failed request(s)).",
        path.display()
    );

    Ok(())
}
