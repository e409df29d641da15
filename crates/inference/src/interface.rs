//! Model-facing task and result types.
//!
//! These types describe a Promptable Visual Segmentation (PVS) request in
//! model terms: frames are addressed by their index in the request
//! (`frame_index`, always 0 for a single image) and instances by small
//! integers. Mapping back to session ids is the caller's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use samnotator_common::SamnotatorResult;
use samnotator_project_model::Mask;

/// Options controlling how masks are produced and filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskOutputOptions {
    /// Top-k masks kept per object.
    pub max_masks_per_object: usize,

    /// Threshold applied when binarizing mask scores, `None` for the default.
    #[serde(default)]
    pub mask_threshold: Option<f32>,
}

/// Threshold used when a task does not set one.
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.5;

impl MaskOutputOptions {
    /// The configured threshold, or [`DEFAULT_MASK_THRESHOLD`].
    pub fn threshold(&self) -> f32 {
        self.mask_threshold.unwrap_or(DEFAULT_MASK_THRESHOLD)
    }
}

impl Default for MaskOutputOptions {
    fn default() -> Self {
        Self {
            max_masks_per_object: 1,
            mask_threshold: None,
        }
    }
}

/// Positive or negative click in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvsPointPrompt {
    pub x: i32,
    pub y: i32,
    pub is_positive: bool,
}

/// Box prompt in image pixels. Boxes are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvsBoxPrompt {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

/// Prompt for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvsInstancePrompt {
    /// Numeric object id, `0..k` within a request.
    pub instance_id: u32,
    pub points: Vec<PvsPointPrompt>,
    #[serde(rename = "box")]
    pub box_prompt: Option<PvsBoxPrompt>,
}

impl PvsInstancePrompt {
    /// True when the prompt carries neither points nor a box.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.box_prompt.is_none()
    }
}

/// Prompts for one frame of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvsFramePrompt {
    /// Index in the request's frame list, not a session frame id.
    pub frame_index: usize,
    pub instances: Vec<PvsInstancePrompt>,
}

/// Propagation options for video requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvsVideoOptions {
    #[serde(default)]
    pub start_frame_index: Option<usize>,
    #[serde(default)]
    pub max_frames: Option<usize>,
    #[serde(default)]
    pub reverse: bool,
}

/// A PVS task. `video_options == None` means image mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvsTask {
    pub frame_prompts: Vec<PvsFramePrompt>,
    pub video_options: Option<PvsVideoOptions>,
    pub output_options: MaskOutputOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "PVSTask")]
    Pvs,
}

/// One inference request as seen by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceInput {
    pub task_type: TaskType,
    pub task: PvsTask,
    pub frame_paths: Vec<PathBuf>,
}

/// Model output for one frame.
///
/// `masks`, `scores`, `boxes` and `instance_ids` are parallel vectors.
/// Boxes are `[x_min, y_min, x_max, y_max]` in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInferenceOutput {
    pub frame_index: usize,
    pub masks: Vec<Mask>,
    pub scores: Vec<f32>,
    pub boxes: Vec<[i32; 4]>,
    pub instance_ids: Vec<u32>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl FrameInferenceOutput {
    /// No detections, with an explanatory message in `meta`.
    pub fn empty(frame_index: usize, message: impl Into<String>) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(
            "message".to_string(),
            serde_json::Value::String(message.into()),
        );
        Self {
            frame_index,
            masks: Vec::new(),
            scores: Vec::new(),
            boxes: Vec::new(),
            instance_ids: Vec::new(),
            meta,
        }
    }

    /// Number of detections.
    pub fn len(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty()
    }
}

/// Output for a whole request, keyed by frame index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub frame_results: BTreeMap<usize, FrameInferenceOutput>,
}

impl InferenceOutput {
    pub fn from_frames(frames: impl IntoIterator<Item = FrameInferenceOutput>) -> Self {
        Self {
            frame_results: frames.into_iter().map(|f| (f.frame_index, f)).collect(),
        }
    }
}

/// Result of a model run: either an error message or data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub error: Option<String>,
    pub data: Option<InferenceOutput>,
}

impl ModelOutput {
    pub fn success(data: InferenceOutput) -> Self {
        Self {
            error: None,
            data: Some(data),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Progress sink handed to [`ModelInterface::run`]: fraction in [0, 1] and
/// an optional message.
pub type ProgressFn<'a> = &'a mut dyn FnMut(f32, Option<&str>);

/// A segmentation model.
///
/// Every method is called on the worker thread only, so implementations may
/// hold heavy, thread-bound resources.
pub trait ModelInterface: Send {
    /// Backend name, e.g. `sam3_pvs_image`.
    fn name(&self) -> &str;

    /// True once `load` succeeded and until `unload`.
    fn ready(&self) -> bool;

    /// Acquire resources on `device`.
    fn load(&mut self, device: &str) -> SamnotatorResult<()>;

    /// Release resources.
    fn unload(&mut self);

    /// Run one request. Failures are reported through [`ModelOutput::failure`].
    fn run(&mut self, input: &InferenceInput, progress: ProgressFn<'_>) -> ModelOutput;
}

/// Builds a model for a model directory; `None` when the directory is unusable.
pub type ModelBuilder = Arc<dyn Fn(&Path) -> Option<Box<dyn ModelInterface>> + Send + Sync>;
