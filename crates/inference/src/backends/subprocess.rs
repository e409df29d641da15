//! SAM3 hosted in an external process.
//!
//! The bridge process is started on `load` as
//! `<program> <args..> --model-dir <dir> --mode <image|video> --device <dev>`
//! and must print `SAMNOTATOR_READY:` once the model is in memory. Requests
//! and results then follow the line protocol in [`super::protocol`].

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use samnotator_common::{BridgeConfig, SamnotatorError, SamnotatorResult};

use crate::backends::protocol::{
    encode_request, parse_line, BridgeFramePrompt, BridgeLine, BridgeMode, BridgeRequest,
    BridgeResponse, SHUTDOWN_PREFIX,
};
use crate::backends::{image_frame_prompt, video_options};
use crate::interface::{
    FrameInferenceOutput, InferenceInput, InferenceOutput, MaskOutputOptions, ModelInterface,
    ModelOutput, ProgressFn, PvsFramePrompt,
};
use crate::sam3::{build_prompt_batches_for_frame, merge_frame_outputs, sort_and_flatten};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running bridge process.
struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

pub struct SubprocessModel {
    config: BridgeConfig,
    model_dir: PathBuf,
    mode: BridgeMode,
    name: String,
    device: Option<String>,
    process: Option<BridgeProcess>,
}

impl SubprocessModel {
    pub fn new(config: BridgeConfig, model_dir: &Path, mode: BridgeMode) -> Self {
        let name = match mode {
            BridgeMode::Image => "sam3_pvs_image",
            BridgeMode::Video => "sam3_pvs_video",
        };
        Self {
            config,
            model_dir: model_dir.to_path_buf(),
            mode,
            name: name.to_string(),
            device: None,
            process: None,
        }
    }

    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    fn spawn(&self, device: &str) -> SamnotatorResult<BridgeProcess> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("--model-dir")
            .arg(&self.model_dir)
            .arg("--mode")
            .arg(self.mode.as_str())
            .arg("--device")
            .arg(device)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SamnotatorError::model(format!(
                    "Failed to start SAM3 bridge '{}': {e}",
                    self.config.program
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SamnotatorError::model("Bridge stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SamnotatorError::model("Bridge stdout not captured"))?;

        let (tx, rx) = mpsc::channel::<String>();
        std::thread::Builder::new()
            .name("samnotator-bridge-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        if let Some(stderr) = child.stderr.take() {
            std::thread::Builder::new()
                .name("samnotator-bridge-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        tracing::debug!(target: "samnotator::bridge", "{line}");
                    }
                })?;
        }

        Ok(BridgeProcess {
            child,
            stdin,
            lines: rx,
        })
    }

    fn wait_ready(&self, process: &mut BridgeProcess) -> SamnotatorResult<()> {
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match process.lines.recv_timeout(remaining) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SamnotatorError::model(format!(
                        "SAM3 bridge not ready after {}s",
                        timeout.as_secs()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let status = match process.child.try_wait() {
                        Ok(Some(status)) => Some(status),
                        _ => {
                            let _ = process.child.kill();
                            process.child.wait().ok()
                        }
                    };
                    return Err(SamnotatorError::model(format!(
                        "SAM3 bridge exited before becoming ready ({status:?})"
                    )));
                }
            };
            match parse_line(&line) {
                BridgeLine::Ready(_) => return Ok(()),
                BridgeLine::Log(text) => tracing::info!(target: "samnotator::bridge", "{text}"),
                BridgeLine::Progress { fraction, .. } => {
                    tracing::debug!(target: "samnotator::bridge", progress = fraction, "Loading");
                }
                BridgeLine::Result(_) => {
                    tracing::warn!("Unexpected result from SAM3 bridge before ready");
                }
                BridgeLine::Other(text) => tracing::debug!(target: "samnotator::bridge", "{text}"),
            }
        }
    }

    fn build_request(&self, input: &InferenceInput) -> Result<BridgeRequest, String> {
        let prompts: Vec<&PvsFramePrompt> = match self.mode {
            BridgeMode::Image => vec![image_frame_prompt(&self.name, input)?],
            BridgeMode::Video => {
                video_options(&self.name, input)?;
                input.task.frame_prompts.iter().collect()
            }
        };

        let frames = prompts
            .into_iter()
            .map(|fp| BridgeFramePrompt {
                frame_index: fp.frame_index,
                batches: build_prompt_batches_for_frame(fp.frame_index, &fp.instances),
            })
            .filter(|f| !f.batches.is_empty())
            .collect();

        Ok(BridgeRequest {
            mode: self.mode,
            frame_paths: input.frame_paths.clone(),
            frames,
            video_options: input.task.video_options.clone(),
            output_options: MaskOutputOptions {
                mask_threshold: Some(input.task.output_options.threshold()),
                ..input.task.output_options.clone()
            },
        })
    }

    fn exchange(
        &mut self,
        request: &BridgeRequest,
        progress: ProgressFn<'_>,
    ) -> Result<BridgeResponse, String> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| format!("{}: bridge process not running", self.name))?;

        let line = encode_request(request).map_err(|e| format!("failed to encode request: {e}"))?;
        writeln!(process.stdin, "{line}")
            .and_then(|_| process.stdin.flush())
            .map_err(|e| format!("failed to write to SAM3 bridge: {e}"))?;

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let failure = loop {
            let line = match process.lines.recv_timeout(timeout) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => {
                    break format!(
                        "{}: SAM3 bridge timed out after {}s without output",
                        self.name,
                        timeout.as_secs()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break format!("{}: SAM3 bridge exited during inference", self.name);
                }
            };
            match parse_line(&line) {
                BridgeLine::Result(result) => return result,
                BridgeLine::Progress { fraction, message } => progress(fraction, message),
                BridgeLine::Log(text) => tracing::info!(target: "samnotator::bridge", "{text}"),
                BridgeLine::Ready(_) => {}
                BridgeLine::Other(text) => tracing::debug!(target: "samnotator::bridge", "{text}"),
            }
        };

        tracing::warn!(model = %self.name, "{failure}");
        self.kill_process();
        Err(failure)
    }

    /// Kill the bridge without the shutdown handshake.
    fn kill_process(&mut self) {
        self.device = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

/// Turn raw per-batch bridge output into per-frame results.
pub fn frames_from_response(
    response: BridgeResponse,
    options: &MaskOutputOptions,
) -> InferenceOutput {
    InferenceOutput::from_frames(response.frames.into_iter().map(|frame| {
        let frame_index = frame.frame_index;
        let outputs = frame.batches.into_iter().map(|batch| {
            sort_and_flatten(
                frame_index,
                batch.masks,
                batch.scores,
                &batch.instance_ids,
                options,
            )
        });
        merge_frame_outputs(frame_index, outputs)
    }))
}

impl ModelInterface for SubprocessModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.process.is_some()
    }

    fn load(&mut self, device: &str) -> SamnotatorResult<()> {
        if self.ready() && self.device.as_deref() == Some(device) {
            return Ok(());
        }
        if self.ready() {
            self.unload();
        }

        tracing::info!(
            model = %self.name,
            dir = %self.model_dir.display(),
            device,
            "Starting SAM3 bridge"
        );
        let mut process = self.spawn(device)?;
        if let Err(e) = self.wait_ready(&mut process) {
            let _ = process.child.kill();
            let _ = process.child.wait();
            return Err(e);
        }

        self.process = Some(process);
        self.device = Some(device.to_string());
        Ok(())
    }

    fn unload(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        self.device = None;

        let _ = writeln!(process.stdin, "{SHUTDOWN_PREFIX}");
        let _ = process.stdin.flush();
        drop(process.stdin);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(model = %self.name, %status, "SAM3 bridge exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                _ => break,
            }
        }
        tracing::warn!(model = %self.name, "SAM3 bridge did not exit, killing it");
        let _ = process.child.kill();
        let _ = process.child.wait();
    }

    fn run(&mut self, input: &InferenceInput, progress: ProgressFn<'_>) -> ModelOutput {
        if !self.ready() {
            return ModelOutput::failure(format!("{}: model is not loaded or not ready", self.name));
        }

        let request = match self.build_request(input) {
            Ok(request) => request,
            Err(message) => return ModelOutput::failure(message),
        };

        if request.frames.is_empty() {
            return match self.mode {
                BridgeMode::Image => ModelOutput::success(InferenceOutput::from_frames([
                    FrameInferenceOutput::empty(0, "No valid instances found after preprocessing"),
                ])),
                BridgeMode::Video => ModelOutput::success(InferenceOutput::default()),
            };
        }

        tracing::debug!(
            model = %self.name,
            frames = request.frame_paths.len(),
            prompted = request.frames.len(),
            "Sending request to SAM3 bridge"
        );
        match self.exchange(&request, progress) {
            Ok(response) => match response.error {
                Some(error) => ModelOutput::failure(format!("{}: {error}", self.name)),
                None => ModelOutput::success(frames_from_response(
                    response,
                    &input.task.output_options,
                )),
            },
            Err(message) => ModelOutput::failure(message),
        }
    }
}

impl Drop for SubprocessModel {
    fn drop(&mut self) {
        self.unload();
    }
}
