//! Geometric reference model.
//!
//! Produces one mask per instance without any learned weights: the union of
//! the instance's box and discs around its positive points, minus discs
//! around its negative points. Useful offline and as a stand-in for SAM3 in
//! tests.

use std::path::Path;

use samnotator_common::SamnotatorResult;
use samnotator_project_model::{Mask, PixelXY};

use crate::backends::{image_frame_prompt, propagation_order, video_options};
use crate::interface::{
    FrameInferenceOutput, InferenceInput, InferenceOutput, MaskOutputOptions, ModelInterface,
    ModelOutput, ProgressFn, PvsFramePrompt, PvsInstancePrompt, PvsPointPrompt,
};
use crate::sam3::sort_and_flatten;

const NAME: &str = "prompt_shape";

pub struct PromptShapeModel {
    radius: u32,
    loaded: bool,
}

impl PromptShapeModel {
    pub fn new(radius: u32) -> Self {
        Self {
            radius,
            loaded: false,
        }
    }

    fn run_frame(
        &self,
        frame_index: usize,
        path: &Path,
        prompt: &PvsFramePrompt,
        options: &MaskOutputOptions,
    ) -> Result<FrameInferenceOutput, String> {
        let (width, height) = image::image_dimensions(path)
            .map_err(|e| format!("{NAME}: failed to read {}: {e}", path.display()))?;

        let instances: Vec<&PvsInstancePrompt> =
            prompt.instances.iter().filter(|i| !i.is_empty()).collect();
        if instances.is_empty() {
            return Ok(FrameInferenceOutput::empty(
                frame_index,
                "No valid instances found after preprocessing",
            ));
        }

        let ids: Vec<u32> = instances.iter().map(|i| i.instance_id).collect();
        let masks = instances
            .iter()
            .map(|i| vec![shape_mask(width, height, i, self.radius)])
            .collect();
        let scores = instances.iter().map(|_| vec![1.0]).collect();

        Ok(sort_and_flatten(frame_index, masks, scores, &ids, options))
    }

    fn run_image(&self, input: &InferenceInput) -> Result<InferenceOutput, String> {
        let prompt = image_frame_prompt(NAME, input)?;
        let frame = self.run_frame(
            0,
            &input.frame_paths[0],
            prompt,
            &input.task.output_options,
        )?;
        Ok(InferenceOutput::from_frames([frame]))
    }

    fn run_video(
        &self,
        input: &InferenceInput,
        progress: ProgressFn<'_>,
    ) -> Result<InferenceOutput, String> {
        let options = video_options(NAME, input)?;
        let prompted: Vec<&PvsFramePrompt> = input
            .task
            .frame_prompts
            .iter()
            .filter(|fp| fp.instances.iter().any(|i| !i.is_empty()))
            .collect();
        if prompted.is_empty() {
            return Ok(InferenceOutput::default());
        }

        let order = propagation_order(options, input.frame_paths.len());
        let total = order.len();
        let mut frames = Vec::with_capacity(total);
        for (n, frame_index) in order.into_iter().enumerate() {
            let Some(prompt) = nearest_prompt(&prompted, frame_index) else {
                continue;
            };
            frames.push(self.run_frame(
                frame_index,
                &input.frame_paths[frame_index],
                prompt,
                &input.task.output_options,
            )?);
            progress((n + 1) as f32 / total as f32, None);
        }
        Ok(InferenceOutput::from_frames(frames))
    }
}

impl ModelInterface for PromptShapeModel {
    fn name(&self) -> &str {
        NAME
    }

    fn ready(&self) -> bool {
        self.loaded
    }

    fn load(&mut self, device: &str) -> SamnotatorResult<()> {
        tracing::debug!(device, "prompt_shape ignores the device");
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
    }

    fn run(&mut self, input: &InferenceInput, progress: ProgressFn<'_>) -> ModelOutput {
        if !self.ready() {
            return ModelOutput::failure(format!("{NAME}: model is not loaded or not ready"));
        }
        let result = if input.task.video_options.is_some() {
            self.run_video(input, progress)
        } else {
            self.run_image(input)
        };
        match result {
            Ok(output) => ModelOutput::success(output),
            Err(message) => ModelOutput::failure(message),
        }
    }
}

/// Prompted frame closest to `frame_index`, earlier frame on ties.
fn nearest_prompt<'a>(
    prompted: &[&'a PvsFramePrompt],
    frame_index: usize,
) -> Option<&'a PvsFramePrompt> {
    prompted
        .iter()
        .min_by_key(|fp| (fp.frame_index.abs_diff(frame_index), fp.frame_index))
        .copied()
}

/// Mask for a single instance prompt, clipped to `width`×`height`.
pub fn shape_mask(width: u32, height: u32, prompt: &PvsInstancePrompt, radius: u32) -> Mask {
    let r2 = radius as i64 * radius as i64;
    Mask::from_fn(width, height, |x, y| {
        let p = PixelXY::new(x as i32, y as i32);
        let near = |pt: &PvsPointPrompt| PixelXY::new(pt.x, pt.y).distance_sq(&p) <= r2;

        let in_box = prompt.box_prompt.is_some_and(|b| {
            (b.x_min..=b.x_max).contains(&p.x) && (b.y_min..=b.y_max).contains(&p.y)
        });
        let positive = prompt.points.iter().any(|pt| pt.is_positive && near(pt));
        let negative = prompt.points.iter().any(|pt| !pt.is_positive && near(pt));

        (in_box || positive) && !negative
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{PvsBoxPrompt, PvsTask, PvsVideoOptions, TaskType};
    use std::path::PathBuf;

    fn write_png(name: &str, width: u32, height: u32) -> PathBuf {
        let dir = std::env::temp_dir().join("samnotator_test_prompt_shape");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        image::RgbImage::new(width, height).save(&path).unwrap();
        path
    }

    fn instance(id: u32, points: Vec<PvsPointPrompt>, b: Option<PvsBoxPrompt>) -> PvsInstancePrompt {
        PvsInstancePrompt {
            instance_id: id,
            points,
            box_prompt: b,
        }
    }

    fn loaded(radius: u32) -> PromptShapeModel {
        let mut model = PromptShapeModel::new(radius);
        model.load("cpu").unwrap();
        model
    }

    #[test]
    fn test_shape_mask_box_minus_negative() {
        let prompt = instance(
            0,
            vec![PvsPointPrompt {
                x: 5,
                y: 5,
                is_positive: false,
            }],
            Some(PvsBoxPrompt {
                x_min: 2,
                y_min: 2,
                x_max: 8,
                y_max: 8,
            }),
        );
        let mask = shape_mask(12, 12, &prompt, 1);
        assert!(mask.get(2, 2));
        assert!(mask.get(8, 8));
        assert!(!mask.get(9, 9));
        assert!(!mask.get(5, 5));
        assert!(!mask.get(5, 6));
        assert!(mask.get(6, 6));
    }

    #[test]
    fn test_shape_mask_positive_disc_is_clipped() {
        let prompt = instance(
            0,
            vec![PvsPointPrompt {
                x: 0,
                y: 0,
                is_positive: true,
            }],
            None,
        );
        let mask = shape_mask(10, 10, &prompt, 2);
        assert_eq!(mask.bounding_box(), Some((PixelXY::new(0, 0), PixelXY::new(2, 2))));
    }

    #[test]
    fn test_run_without_load() {
        let mut model = PromptShapeModel::new(3);
        let input = InferenceInput {
            task_type: TaskType::Pvs,
            task: PvsTask {
                frame_prompts: vec![],
                video_options: None,
                output_options: MaskOutputOptions::default(),
            },
            frame_paths: vec![],
        };
        assert!(!model.run(&input, &mut |_, _| {}).is_ok());
    }

    #[test]
    fn test_image_run() {
        let path = write_png("image_run.png", 20, 10);
        let mut model = loaded(2);
        let input = InferenceInput {
            task_type: TaskType::Pvs,
            task: PvsTask {
                frame_prompts: vec![PvsFramePrompt {
                    frame_index: 0,
                    instances: vec![
                        instance(
                            1,
                            vec![PvsPointPrompt {
                                x: 10,
                                y: 5,
                                is_positive: true,
                            }],
                            None,
                        ),
                        instance(0, vec![], None),
                    ],
                }],
                video_options: None,
                output_options: MaskOutputOptions::default(),
            },
            frame_paths: vec![path],
        };

        let output = model.run(&input, &mut |_, _| {});
        assert!(output.is_ok(), "{:?}", output.error);
        let frame = &output.data.unwrap().frame_results[&0];
        assert_eq!(frame.instance_ids, vec![1]);
        assert_eq!(frame.scores, vec![1.0]);
        assert_eq!(frame.boxes[0], [8, 3, 12, 7]);
        assert_eq!(frame.masks[0].width(), 20);
    }

    #[test]
    fn test_video_reuses_nearest_prompt() {
        let paths: Vec<PathBuf> = (0..4)
            .map(|i| write_png(&format!("video_{i}.png"), 16, 16))
            .collect();
        let mut model = loaded(1);
        let input = InferenceInput {
            task_type: TaskType::Pvs,
            task: PvsTask {
                frame_prompts: vec![
                    PvsFramePrompt {
                        frame_index: 0,
                        instances: vec![instance(
                            0,
                            vec![PvsPointPrompt {
                                x: 2,
                                y: 2,
                                is_positive: true,
                            }],
                            None,
                        )],
                    },
                    PvsFramePrompt {
                        frame_index: 3,
                        instances: vec![instance(
                            0,
                            vec![PvsPointPrompt {
                                x: 12,
                                y: 12,
                                is_positive: true,
                            }],
                            None,
                        )],
                    },
                ],
                video_options: Some(PvsVideoOptions::default()),
                output_options: MaskOutputOptions::default(),
            },
            frame_paths: paths,
        };

        let mut steps = Vec::new();
        let output = model.run(&input, &mut |p, _| steps.push(p));
        let results = output.data.unwrap().frame_results;
        assert_eq!(results.len(), 4);
        assert_eq!(results[&1].boxes[0], [1, 1, 3, 3]);
        assert_eq!(results[&2].boxes[0], [11, 11, 13, 13]);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[3], 1.0);
    }
}
