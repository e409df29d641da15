//! Model controller: owns the worker, tracks in-flight requests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use samnotator_common::{SamnotatorError, SamnotatorResult};
use samnotator_project_model::{FrameId, InstanceId};

use crate::interface::{InferenceInput, ModelOutput};
use crate::registry::ModelRegistry;
use crate::worker::{ModelWorker, WorkerMessage, NO_MODEL_LOADED};

/// A request together with the mappings needed to interpret its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Unique id, `"<model>:<n>"`.
    pub request_id: String,

    /// Request frame index to session frame.
    pub frame_mapping: BTreeMap<usize, FrameId>,

    /// Numeric object id to session instance.
    pub instance_mapping: BTreeMap<u32, InstanceId>,

    pub input: InferenceInput,
}

/// A finished request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub request: InferenceRequest,
    pub output: ModelOutput,
}

/// What [`ModelController::poll`] reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Result(InferenceResult),
    Progress {
        request_id: String,
        progress: f32,
        message: Option<String>,
    },
    Log(String),
}

/// Front end of the model worker.
pub struct ModelController {
    registry: ModelRegistry,
    worker: Option<ModelWorker>,
    active_requests: HashMap<String, InferenceRequest>,
    loaded_model: Option<String>,
}

impl ModelController {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            worker: None,
            active_requests: HashMap::new(),
            loaded_model: None,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Wrapper name of the last model sent to the worker.
    pub fn loaded_model(&self) -> Option<&str> {
        self.loaded_model.as_deref()
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn active_request_count(&self) -> usize {
        self.active_requests.len()
    }

    pub fn is_request_active(&self, request_id: &str) -> bool {
        self.active_requests.contains_key(request_id)
    }

    /// Restart the worker and load `wrapper_name` from `path` on `device`.
    ///
    /// Loading happens on the worker; failures there arrive as log events.
    pub fn load_model(&mut self, wrapper_name: &str, path: &Path, device: &str) -> SamnotatorResult<()> {
        self.reset_worker()?;
        let model = self.registry.build(wrapper_name, path)?;

        tracing::info!(
            model = wrapper_name,
            path = %path.display(),
            device,
            "Loading model"
        );
        self.worker
            .as_ref()
            .ok_or_else(|| SamnotatorError::model("Model worker not running"))?
            .load(model, device)?;
        self.loaded_model = Some(wrapper_name.to_string());
        Ok(())
    }

    /// Abort active requests and stop the worker.
    pub fn unload_model(&mut self) -> Vec<ModelEvent> {
        self.stop_worker()
    }

    /// Queue a request on the worker.
    pub fn run_inference(&mut self, request: InferenceRequest) -> SamnotatorResult<()> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(SamnotatorError::model(NO_MODEL_LOADED));
        };

        tracing::debug!(request_id = %request.request_id, "Submitting inference request");
        worker.run(request.request_id.clone(), request.input.clone())?;
        self.active_requests
            .insert(request.request_id.clone(), request);
        Ok(())
    }

    /// Drain everything the worker has reported so far.
    pub fn poll(&mut self) -> Vec<ModelEvent> {
        let mut events = Vec::new();
        while let Some(message) = self.worker.as_ref().and_then(ModelWorker::try_recv) {
            events.push(self.handle_message(message));
        }
        events
    }

    /// Block until `request_id` finishes or `timeout` elapses.
    ///
    /// Other messages received meanwhile are logged and dropped.
    pub fn wait_for(&mut self, request_id: &str, timeout: Duration) -> SamnotatorResult<InferenceResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let worker = self
                .worker
                .as_ref()
                .ok_or_else(|| SamnotatorError::model(NO_MODEL_LOADED))?;

            let message = worker.recv_timeout(remaining).map_err(|_| {
                SamnotatorError::model(format!(
                    "Timed out after {:.0}s waiting for request {request_id}",
                    timeout.as_secs_f64()
                ))
            })?;

            match self.handle_message(message) {
                ModelEvent::Result(result) if result.request.request_id == request_id => {
                    return Ok(result);
                }
                ModelEvent::Result(result) => {
                    tracing::warn!(
                        request_id = %result.request.request_id,
                        "Dropping result of another request while waiting"
                    );
                }
                ModelEvent::Progress {
                    progress, message, ..
                } => {
                    tracing::info!(
                        progress = progress,
                        message = message.as_deref().unwrap_or(""),
                        "Inference progress"
                    );
                }
                ModelEvent::Log(line) => tracing::info!("{line}"),
            }
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) -> ModelEvent {
        match message {
            WorkerMessage::Result { request_id, output } => {
                match self.active_requests.remove(&request_id) {
                    Some(request) => ModelEvent::Result(InferenceResult { request, output }),
                    None => ModelEvent::Log(format!(
                        "Received inference result for unknown request ID '{request_id}'"
                    )),
                }
            }
            WorkerMessage::Progress {
                request_id,
                progress,
                message,
            } => ModelEvent::Progress {
                request_id,
                progress,
                message,
            },
            WorkerMessage::Log(line) => ModelEvent::Log(format!("Worker log: {line}")),
        }
    }

    fn reset_worker(&mut self) -> SamnotatorResult<()> {
        for event in self.stop_worker() {
            if let ModelEvent::Log(line) = event {
                tracing::info!("{line}");
            }
        }
        self.worker = Some(ModelWorker::spawn()?);
        Ok(())
    }

    fn stop_worker(&mut self) -> Vec<ModelEvent> {
        let Some(mut worker) = self.worker.take() else {
            return Vec::new();
        };

        let mut events: Vec<ModelEvent> = self
            .active_requests
            .drain()
            .map(|(id, _)| {
                ModelEvent::Log(format!(
                    "Aborting active inference request {id} due to model unload"
                ))
            })
            .collect();

        worker.shutdown();
        while let Some(WorkerMessage::Log(line)) = worker.try_recv() {
            events.push(ModelEvent::Log(format!("Worker log: {line}")));
        }
        self.loaded_model = None;
        events
    }
}

impl Drop for ModelController {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{MaskOutputOptions, PvsTask, TaskType};
    use samnotator_common::AppConfig;

    fn request(id: &str) -> InferenceRequest {
        InferenceRequest {
            request_id: id.to_string(),
            frame_mapping: BTreeMap::new(),
            instance_mapping: BTreeMap::new(),
            input: InferenceInput {
                task_type: TaskType::Pvs,
                task: PvsTask {
                    frame_prompts: vec![],
                    video_options: None,
                    output_options: MaskOutputOptions::default(),
                },
                frame_paths: vec![],
            },
        }
    }

    #[test]
    fn test_run_without_worker() {
        let mut controller = ModelController::new(ModelRegistry::new());
        let err = controller.run_inference(request("m:0")).unwrap_err();
        assert!(err.to_string().contains(NO_MODEL_LOADED));
        assert!(controller.poll().is_empty());
    }

    #[test]
    fn test_unknown_model_keeps_worker_idle() {
        let mut controller = ModelController::new(ModelRegistry::new());
        assert!(controller
            .load_model("missing", Path::new("."), "cpu")
            .is_err());
        assert!(controller.has_worker());
        assert!(controller.loaded_model().is_none());

        controller.run_inference(request("m:1")).unwrap();
        let result = controller
            .wait_for("m:1", Duration::from_secs(5))
            .unwrap();
        assert_eq!(result.output.error.as_deref(), Some(NO_MODEL_LOADED));
        assert_eq!(controller.active_request_count(), 0);
    }

    #[test]
    fn test_unload_aborts_active_requests() {
        let mut controller = ModelController::new(ModelRegistry::new());
        controller.load_model("missing", Path::new("."), "cpu").ok();
        controller.run_inference(request("m:2")).unwrap();

        let events = controller.unload_model();
        assert!(events.iter().any(|e| matches!(
            e,
            ModelEvent::Log(line) if line == "Aborting active inference request m:2 due to model unload"
        )));
        assert!(!controller.has_worker());
        assert_eq!(controller.active_request_count(), 0);
    }

    #[test]
    fn test_worker_logs_are_prefixed() {
        let mut controller =
            ModelController::new(ModelRegistry::with_defaults(&AppConfig::default()));
        controller
            .load_model("prompt_shape", Path::new("."), "cpu")
            .unwrap();
        assert_eq!(controller.loaded_model(), Some("prompt_shape"));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut logs = Vec::new();
        while logs.is_empty() && Instant::now() < deadline {
            logs.extend(controller.poll().into_iter().filter_map(|e| match e {
                ModelEvent::Log(line) => Some(line),
                _ => None,
            }));
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(logs[0].starts_with("Worker log: "));
    }
}
