//! Samnotator Controllers
//!
//! Editing state behind the annotator UI:
//! - **Frames:** the loaded image sequence and the current frame
//! - **Instances:** user-defined objects, colours and detections
//! - **Annotations:** point and box prompts with per-pixel occupancy
//! - **Prompt:** annotations to model requests
//! - **Session:** the [`AppController`] wiring it all to the model runner
//!
//! Controllers report changes through [`ControllerEvent`] queues that the UI
//! drains once per frame.

pub mod annotations;
pub mod events;
pub mod frames;
pub mod instances;
pub mod prompt;
pub mod session;

pub use annotations::AnnotationController;
pub use events::{ControllerEvent, EventQueue};
pub use frames::{
    frame_sources_from_paths, ExtensionFilter, FrameController, FrameInfo, FrameSource,
    ImageInfo, PathFrame, VideoFrameInfo,
};
pub use instances::{InstanceController, InstanceInfo, InstanceUpdate, MarkerSizes};
pub use prompt::{build_image_request, build_video_request, PromptError, RequestIdGenerator};
pub use session::AppController;
