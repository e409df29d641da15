//! Dedicated model thread.
//!
//! The worker owns the loaded model. It receives commands over one channel
//! and reports results and log lines over another, so the caller never
//! blocks on a model call.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use samnotator_common::{SamnotatorError, SamnotatorResult};

use crate::interface::{InferenceInput, ModelInterface, ModelOutput};

/// Failure message for runs without a ready model.
pub const NO_MODEL_LOADED: &str = "No model loaded";

/// Commands sent to the worker thread.
pub enum WorkerCommand {
    Load {
        model: Box<dyn ModelInterface>,
        device: String,
    },
    Run {
        request_id: String,
        input: InferenceInput,
    },
    Unload,
    Shutdown,
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerCommand::Load { model, device } => f
                .debug_struct("Load")
                .field("model", &model.name())
                .field("device", device)
                .finish(),
            WorkerCommand::Run { request_id, .. } => {
                f.debug_struct("Run").field("request_id", request_id).finish()
            }
            WorkerCommand::Unload => write!(f, "Unload"),
            WorkerCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Messages sent back by the worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Result {
        request_id: String,
        output: ModelOutput,
    },
    Progress {
        request_id: String,
        progress: f32,
        message: Option<String>,
    },
    Log(String),
}

/// Handle to a running worker thread.
pub struct ModelWorker {
    commands: Sender<WorkerCommand>,
    messages: Receiver<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl ModelWorker {
    /// Start a new worker thread with no model.
    pub fn spawn() -> SamnotatorResult<Self> {
        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let (message_tx, message_rx) = mpsc::channel::<WorkerMessage>();

        let handle = std::thread::Builder::new()
            .name("samnotator-model-worker".to_string())
            .spawn(move || worker_loop(command_rx, message_tx))?;

        tracing::debug!("Model worker started");
        Ok(Self {
            commands: command_tx,
            messages: message_rx,
            handle: Some(handle),
        })
    }

    /// Queue a command.
    pub fn send(&self, command: WorkerCommand) -> SamnotatorResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SamnotatorError::model("Model worker has stopped"))
    }

    pub fn load(&self, model: Box<dyn ModelInterface>, device: impl Into<String>) -> SamnotatorResult<()> {
        self.send(WorkerCommand::Load {
            model,
            device: device.into(),
        })
    }

    pub fn run(&self, request_id: impl Into<String>, input: InferenceInput) -> SamnotatorResult<()> {
        self.send(WorkerCommand::Run {
            request_id: request_id.into(),
            input,
        })
    }

    pub fn unload(&self) -> SamnotatorResult<()> {
        self.send(WorkerCommand::Unload)
    }

    /// Next pending message, if any.
    pub fn try_recv(&self) -> Option<WorkerMessage> {
        self.messages.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkerMessage, RecvTimeoutError> {
        self.messages.recv_timeout(timeout)
    }

    /// Unload the model and join the thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            tracing::error!("Model worker thread panicked");
        }
        tracing::debug!("Model worker stopped");
    }
}

impl Drop for ModelWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(commands: Receiver<WorkerCommand>, messages: Sender<WorkerMessage>) {
    let mut model: Option<Box<dyn ModelInterface>> = None;

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Load {
                model: mut next,
                device,
            } => {
                unload_model(&mut model);
                let name = next.name().to_string();
                match next.load(&device) {
                    Ok(()) => {
                        tracing::info!(model = %name, device = %device, "Model loaded");
                        let _ = messages.send(WorkerMessage::Log(format!(
                            "Loaded model {name} on {device}"
                        )));
                    }
                    Err(e) => {
                        tracing::error!(model = %name, error = %e, "Model load failed");
                        let _ = messages.send(WorkerMessage::Log(format!(
                            "load_model() failed for {name}: {e}"
                        )));
                    }
                }
                model = Some(next);
            }
            WorkerCommand::Run { request_id, input } => {
                let output = run_model(model.as_deref_mut(), &request_id, &input, &messages);
                let _ = messages.send(WorkerMessage::Result { request_id, output });
            }
            WorkerCommand::Unload => unload_model(&mut model),
            WorkerCommand::Shutdown => break,
        }
    }

    unload_model(&mut model);
}

fn unload_model(model: &mut Option<Box<dyn ModelInterface>>) {
    if let Some(mut m) = model.take() {
        if m.ready() {
            m.unload();
            tracing::info!(model = %m.name(), "Model unloaded");
        }
    }
}

fn run_model(
    model: Option<&mut (dyn ModelInterface + 'static)>,
    request_id: &str,
    input: &InferenceInput,
    messages: &Sender<WorkerMessage>,
) -> ModelOutput {
    let Some(model) = model.filter(|m| m.ready()) else {
        return ModelOutput::failure(NO_MODEL_LOADED);
    };

    tracing::debug!(request_id, model = %model.name(), "Running inference");
    let mut progress = |progress: f32, message: Option<&str>| {
        let _ = messages.send(WorkerMessage::Progress {
            request_id: request_id.to_string(),
            progress,
            message: message.map(str::to_string),
        });
    };

    match panic::catch_unwind(AssertUnwindSafe(|| model.run(input, &mut progress))) {
        Ok(output) => output,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(request_id, reason = %reason, "Model run panicked");
            ModelOutput::failure(format!("Model run exception: {reason}"))
        }
    }
}
