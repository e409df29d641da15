//! Turning session annotations into model requests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use samnotator_inference::{
    InferenceInput, InferenceRequest, MaskOutputOptions, PvsBoxPrompt, PvsFramePrompt,
    PvsInstancePrompt, PvsPointPrompt, PvsTask, PvsVideoOptions, TaskType,
};
use samnotator_project_model::{FrameId, InstanceId, PointKind};

use crate::annotations::AnnotationController;

/// Why a request could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("No clicks or bounding boxes on this frame")]
    Empty,

    #[error(
        "More than one bbox for instance {instance_id} on frame {frame_id} (PVS expects at most one box per instance)"
    )]
    MultipleBoxes {
        instance_id: InstanceId,
        frame_id: FrameId,
    },
}

/// Prompts gathered for one instance on one frame.
#[derive(Debug, Default)]
struct InstancePrompts {
    points: Vec<PvsPointPrompt>,
    box_prompt: Option<PvsBoxPrompt>,
}

fn collect_frame(
    annotations: &AnnotationController,
    frame_id: FrameId,
) -> Result<BTreeMap<InstanceId, InstancePrompts>, PromptError> {
    let mut by_instance: BTreeMap<InstanceId, InstancePrompts> = BTreeMap::new();

    for pa in annotations.points_for_frame(frame_id) {
        by_instance
            .entry(pa.instance_id)
            .or_default()
            .points
            .push(PvsPointPrompt {
                x: pa.point.position.x,
                y: pa.point.position.y,
                is_positive: pa.point.kind == PointKind::Positive,
            });
    }

    for ba in annotations.bboxes_for_frame(frame_id) {
        if ba.bbox.kind != PointKind::Positive {
            tracing::warn!(
                instance_id = %ba.instance_id,
                %frame_id,
                "Ignoring negative bbox"
            );
            continue;
        }
        let slot = &mut by_instance.entry(ba.instance_id).or_default().box_prompt;
        if slot.is_some() {
            return Err(PromptError::MultipleBoxes {
                instance_id: ba.instance_id,
                frame_id,
            });
        }
        *slot = Some(PvsBoxPrompt {
            x_min: ba.bbox.top_left.x,
            y_min: ba.bbox.top_left.y,
            x_max: ba.bbox.bottom_right.x,
            y_max: ba.bbox.bottom_right.y,
        });
    }

    Ok(by_instance)
}

/// Numeric ids `0..k` for the given instances, in ascending id order.
fn number_instances(ids: impl IntoIterator<Item = InstanceId>) -> BTreeMap<InstanceId, u32> {
    ids.into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(n, id)| (id, n as u32))
        .collect()
}

fn frame_prompt(
    frame_index: usize,
    prompts: BTreeMap<InstanceId, InstancePrompts>,
    numbering: &BTreeMap<InstanceId, u32>,
) -> PvsFramePrompt {
    let mut instances: Vec<PvsInstancePrompt> = prompts
        .into_iter()
        .filter_map(|(id, p)| {
            Some(PvsInstancePrompt {
                instance_id: *numbering.get(&id)?,
                points: p.points,
                box_prompt: p.box_prompt,
            })
        })
        .collect();
    instances.sort_by_key(|i| i.instance_id);
    PvsFramePrompt {
        frame_index,
        instances,
    }
}

/// Single-image request for `frame_id`.
pub fn build_image_request(
    request_id: impl Into<String>,
    frame_id: FrameId,
    frame_path: PathBuf,
    annotations: &AnnotationController,
) -> Result<InferenceRequest, PromptError> {
    let prompts = collect_frame(annotations, frame_id)?;
    if prompts.is_empty() {
        return Err(PromptError::Empty);
    }

    let numbering = number_instances(prompts.keys().copied());
    let prompt = frame_prompt(0, prompts, &numbering);

    tracing::debug!(
        %frame_id,
        points = prompt.instances.iter().map(|i| i.points.len()).sum::<usize>(),
        boxes = prompt.instances.iter().filter(|i| i.box_prompt.is_some()).count(),
        path = %frame_path.display(),
        "Built image request"
    );

    Ok(InferenceRequest {
        request_id: request_id.into(),
        frame_mapping: BTreeMap::from([(0, frame_id)]),
        instance_mapping: numbering.into_iter().map(|(id, n)| (n, id)).collect(),
        input: InferenceInput {
            task_type: TaskType::Pvs,
            task: PvsTask {
                frame_prompts: vec![prompt],
                video_options: None,
                output_options: MaskOutputOptions::default(),
            },
            frame_paths: vec![frame_path],
        },
    })
}

/// Propagation request over a frame sequence.
///
/// `frames` lists the whole sequence in order; each annotated frame becomes a
/// prompt at its position in that list.
pub fn build_video_request(
    request_id: impl Into<String>,
    frames: &[(FrameId, PathBuf)],
    annotations: &AnnotationController,
    video_options: PvsVideoOptions,
) -> Result<InferenceRequest, PromptError> {
    let mut per_frame = Vec::new();
    for (frame_index, (frame_id, _)) in frames.iter().enumerate() {
        let prompts = collect_frame(annotations, *frame_id)?;
        if !prompts.is_empty() {
            per_frame.push((frame_index, prompts));
        }
    }
    if per_frame.is_empty() {
        return Err(PromptError::Empty);
    }

    let numbering = number_instances(
        per_frame
            .iter()
            .flat_map(|(_, prompts)| prompts.keys().copied()),
    );
    let frame_prompts: Vec<PvsFramePrompt> = per_frame
        .into_iter()
        .map(|(frame_index, prompts)| frame_prompt(frame_index, prompts, &numbering))
        .collect();

    tracing::debug!(
        frames = frames.len(),
        prompted = frame_prompts.len(),
        instances = numbering.len(),
        "Built video request"
    );

    Ok(InferenceRequest {
        request_id: request_id.into(),
        frame_mapping: frames
            .iter()
            .enumerate()
            .map(|(index, (frame_id, _))| (index, *frame_id))
            .collect(),
        instance_mapping: numbering.into_iter().map(|(id, n)| (n, id)).collect(),
        input: InferenceInput {
            task_type: TaskType::Pvs,
            task: PvsTask {
                frame_prompts,
                video_options: Some(video_options),
                output_options: MaskOutputOptions::default(),
            },
            frame_paths: frames.iter().map(|(_, path)| path.clone()).collect(),
        },
    })
}

/// Hands out request ids of the form `"<model>:<n>"`.
#[derive(Debug, Default, Clone)]
pub struct RequestIdGenerator {
    next: u64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, model_name: &str) -> String {
        let id = format!("{model_name}:{}", self.next);
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samnotator_project_model::{BBox, PixelXY, Point};

    fn bbox(kind: PointKind) -> BBox {
        BBox::from_corners(PixelXY::new(1, 2), PixelXY::new(30, 40), kind)
    }

    #[test]
    fn test_image_request_groups_and_numbers_instances() {
        let mut ann = AnnotationController::new();
        ann.create_point(FrameId(3), InstanceId(7), Point::positive(5, 6));
        ann.create_point(FrameId(3), InstanceId(2), Point::negative(8, 9));
        ann.create_point(FrameId(3), InstanceId(7), Point::negative(1, 1));
        ann.create_bbox(FrameId(3), InstanceId(7), bbox(PointKind::Positive));
        ann.create_point(FrameId(4), InstanceId(9), Point::positive(0, 0));

        let request =
            build_image_request("m:0", FrameId(3), "/tmp/f3.png".into(), &ann).unwrap();
        assert_eq!(request.frame_mapping, BTreeMap::from([(0, FrameId(3))]));
        assert_eq!(
            request.instance_mapping,
            BTreeMap::from([(0, InstanceId(2)), (1, InstanceId(7))])
        );

        let task = &request.input.task;
        assert!(task.video_options.is_none());
        assert_eq!(task.frame_prompts.len(), 1);
        let prompt = &task.frame_prompts[0];
        assert_eq!(prompt.frame_index, 0);
        assert_eq!(prompt.instances[0].points.len(), 1);
        assert!(!prompt.instances[0].points[0].is_positive);
        assert_eq!(prompt.instances[1].points.len(), 2);
        assert_eq!(
            prompt.instances[1].box_prompt,
            Some(PvsBoxPrompt {
                x_min: 1,
                y_min: 2,
                x_max: 30,
                y_max: 40
            })
        );
        assert_eq!(request.input.frame_paths, vec![PathBuf::from("/tmp/f3.png")]);
    }

    #[test]
    fn test_negative_boxes_are_skipped() {
        let mut ann = AnnotationController::new();
        ann.create_bbox(FrameId(0), InstanceId(0), bbox(PointKind::Negative));
        assert_eq!(
            build_image_request("m:0", FrameId(0), "f.png".into(), &ann).unwrap_err(),
            PromptError::Empty
        );
    }

    #[test]
    fn test_two_positive_boxes_for_one_instance() {
        use samnotator_project_model::{BBoxAnnotation, BBoxId};

        let mut ann = AnnotationController::new();
        for id in [0, 1] {
            ann.restore_bbox(BBoxAnnotation {
                bbox_id: BBoxId(id),
                frame_id: FrameId(0),
                instance_id: InstanceId(4),
                bbox: bbox(PointKind::Positive),
            });
        }
        assert_eq!(
            build_image_request("m:0", FrameId(0), "f.png".into(), &ann).unwrap_err(),
            PromptError::MultipleBoxes {
                instance_id: InstanceId(4),
                frame_id: FrameId(0)
            }
        );
    }

    #[test]
    fn test_empty_frame() {
        let ann = AnnotationController::new();
        assert_eq!(
            build_image_request("m:0", FrameId(0), "f.png".into(), &ann).unwrap_err(),
            PromptError::Empty
        );
    }

    #[test]
    fn test_video_request_numbers_consistently() {
        let mut ann = AnnotationController::new();
        ann.create_point(FrameId(10), InstanceId(5), Point::positive(1, 1));
        ann.create_point(FrameId(12), InstanceId(1), Point::positive(2, 2));
        ann.create_point(FrameId(12), InstanceId(5), Point::positive(3, 3));

        let frames: Vec<(FrameId, PathBuf)> = (10..13)
            .map(|i| (FrameId(i), PathBuf::from(format!("f{i}.png"))))
            .collect();
        let request =
            build_video_request("m:1", &frames, &ann, PvsVideoOptions::default()).unwrap();

        assert_eq!(request.input.frame_paths.len(), 3);
        assert_eq!(request.frame_mapping[&2], FrameId(12));
        assert_eq!(
            request.instance_mapping,
            BTreeMap::from([(0, InstanceId(1)), (1, InstanceId(5))])
        );

        let prompts = &request.input.task.frame_prompts;
        assert_eq!(
            prompts.iter().map(|p| p.frame_index).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(prompts[0].instances[0].instance_id, 1);
        assert_eq!(
            prompts[1]
                .instances
                .iter()
                .map(|i| i.instance_id)
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(
            request.input.task.video_options,
            Some(PvsVideoOptions::default())
        );
    }

    #[test]
    fn test_request_ids() {
        let mut ids = RequestIdGenerator::new();
        assert_eq!(ids.next_id("sam3"), "sam3:0");
        assert_eq!(ids.next_id("other"), "other:1");
    }
}
