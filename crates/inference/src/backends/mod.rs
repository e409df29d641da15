//! Model backends.
//!
//! - [`prompt_shape`]: geometric reference model, no external dependencies
//! - [`subprocess`]: SAM3 hosted in an external process, driven over stdio
//! - [`protocol`]: line protocol spoken with that process

pub mod prompt_shape;
pub mod protocol;
pub mod subprocess;

use crate::interface::{InferenceInput, PvsFramePrompt, PvsVideoOptions};

/// Check an image-mode request and return its single frame prompt.
///
/// Image mode takes exactly one frame, no video options, and exactly one
/// frame prompt with index 0. The error is the failure message.
pub fn image_frame_prompt<'a>(
    backend: &str,
    input: &'a InferenceInput,
) -> Result<&'a PvsFramePrompt, String> {
    if input.frame_paths.len() != 1 {
        return Err(format!(
            "{backend}: only single-frame PVS is supported in image mode ({} frames given)",
            input.frame_paths.len()
        ));
    }
    if input.task.video_options.is_some() {
        return Err(format!(
            "{backend}: video_options are not supported in image mode"
        ));
    }

    let candidates: Vec<&PvsFramePrompt> = input
        .task
        .frame_prompts
        .iter()
        .filter(|fp| fp.frame_index == 0)
        .collect();
    match candidates.as_slice() {
        [] => Err(format!(
            "{backend}: no acceptable frame prompt found (with frame index == 0, expected for image input)"
        )),
        [single] => Ok(single),
        many => Err(format!(
            "{backend}: multiple ({}) frame prompts found with frame index == 0; ambiguous for image input",
            many.len()
        )),
    }
}

/// Check a video-mode request and return its options.
pub fn video_options<'a>(
    backend: &str,
    input: &'a InferenceInput,
) -> Result<&'a PvsVideoOptions, String> {
    if input.frame_paths.is_empty() {
        return Err(format!("{backend}: no frame_paths provided"));
    }
    input.task.video_options.as_ref().ok_or_else(|| {
        format!("{backend}: video_options is None, but this is the video implementation")
    })
}

/// Frame indices visited by propagation, in visiting order.
///
/// Forward propagation starts at `start_frame_index` (default 0); reverse
/// propagation starts there too, defaulting to the last frame. At most
/// `max_frames` frames are visited.
pub fn propagation_order(options: &PvsVideoOptions, num_frames: usize) -> Vec<usize> {
    if num_frames == 0 {
        return Vec::new();
    }
    let limit = options.max_frames.unwrap_or(num_frames);

    if options.reverse {
        let start = options
            .start_frame_index
            .unwrap_or(num_frames - 1)
            .min(num_frames - 1);
        (0..=start).rev().take(limit).collect()
    } else {
        let start = options.start_frame_index.unwrap_or(0);
        (start..num_frames).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{MaskOutputOptions, PvsTask, TaskType};
    use std::path::PathBuf;

    fn input(frames: usize, prompts: &[usize], video: Option<PvsVideoOptions>) -> InferenceInput {
        InferenceInput {
            task_type: TaskType::Pvs,
            task: PvsTask {
                frame_prompts: prompts
                    .iter()
                    .map(|&frame_index| PvsFramePrompt {
                        frame_index,
                        instances: vec![],
                    })
                    .collect(),
                video_options: video,
                output_options: MaskOutputOptions::default(),
            },
            frame_paths: (0..frames)
                .map(|i| PathBuf::from(format!("f{i}.png")))
                .collect(),
        }
    }

    #[test]
    fn test_image_mode_checks() {
        assert!(image_frame_prompt("t", &input(1, &[0], None)).is_ok());
        assert!(image_frame_prompt("t", &input(2, &[0], None))
            .unwrap_err()
            .contains("single-frame"));
        assert!(image_frame_prompt("t", &input(1, &[0], Some(PvsVideoOptions::default())))
            .unwrap_err()
            .contains("video_options"));
        assert!(image_frame_prompt("t", &input(1, &[], None))
            .unwrap_err()
            .contains("no acceptable frame prompt"));
        assert!(image_frame_prompt("t", &input(1, &[0, 0], None))
            .unwrap_err()
            .contains("multiple (2)"));
    }

    #[test]
    fn test_video_mode_checks() {
        assert!(video_options("t", &input(0, &[], Some(PvsVideoOptions::default()))).is_err());
        assert!(video_options("t", &input(3, &[], None)).is_err());
        assert!(video_options("t", &input(3, &[], Some(PvsVideoOptions::default()))).is_ok());
    }

    #[test]
    fn test_propagation_order() {
        let forward = PvsVideoOptions::default();
        assert_eq!(propagation_order(&forward, 4), vec![0, 1, 2, 3]);

        let limited = PvsVideoOptions {
            start_frame_index: Some(1),
            max_frames: Some(2),
            reverse: false,
        };
        assert_eq!(propagation_order(&limited, 10), vec![1, 2]);

        let reverse = PvsVideoOptions {
            start_frame_index: None,
            max_frames: None,
            reverse: true,
        };
        assert_eq!(propagation_order(&reverse, 3), vec![2, 1, 0]);

        let reverse_from = PvsVideoOptions {
            start_frame_index: Some(5),
            max_frames: Some(2),
            reverse: true,
        };
        assert_eq!(propagation_order(&reverse_from, 10), vec![5, 4]);
        assert!(propagation_order(&forward, 0).is_empty());
    }
}
