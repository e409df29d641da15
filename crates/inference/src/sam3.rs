//! SAM3 prompt batching and mask post-processing.
//!
//! SAM3 takes all objects of a batch in a single forward pass, but a batch
//! either has a box for every object or for none. Prompts are therefore split
//! into a "with box" and a "without box" batch, and the per-batch outputs are
//! merged back per frame.

use serde::{Deserialize, Serialize};

use samnotator_project_model::Mask;

use crate::interface::{FrameInferenceOutput, MaskOutputOptions, PvsInstancePrompt};

/// Label SAM3 uses for a padding point.
pub const PADDING_LABEL: i32 = -1;

/// Processor inputs for one forward pass.
///
/// Shapes (without the batch dimension): points `[objects][points][2]`,
/// labels `[objects][points]`, boxes `[objects][4]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBatch {
    pub frame_index: usize,
    pub input_points: Vec<Vec<[f32; 2]>>,
    pub input_labels: Vec<Vec<i32>>,
    pub input_boxes: Option<Vec<[f32; 4]>>,
    pub instance_ids: Vec<u32>,
}

impl PromptBatch {
    pub fn len(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty()
    }
}

/// Up to two batches for a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptBatches {
    pub with_box: Option<PromptBatch>,
    pub without_box: Option<PromptBatch>,
}

impl PromptBatches {
    pub fn is_empty(&self) -> bool {
        self.with_box.is_none() && self.without_box.is_none()
    }

    /// Named batches, boxed batch first.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PromptBatch)> {
        self.with_box
            .as_ref()
            .map(|b| ("with_box", b))
            .into_iter()
            .chain(self.without_box.as_ref().map(|b| ("without_box", b)))
    }
}

/// Split a frame's instance prompts into SAM3 batches.
///
/// Instances without points and box are dropped. Instances without points
/// get a single `(0, 0)` padding point labelled `-1`.
pub fn build_prompt_batches_for_frame(
    frame_index: usize,
    instances: &[PvsInstancePrompt],
) -> PromptBatches {
    let (with_box, without_box): (Vec<&PvsInstancePrompt>, Vec<&PvsInstancePrompt>) = instances
        .iter()
        .filter(|inst| !inst.is_empty())
        .partition(|inst| inst.box_prompt.is_some());

    PromptBatches {
        with_box: (!with_box.is_empty()).then(|| make_batch(frame_index, &with_box, true)),
        without_box: (!without_box.is_empty())
            .then(|| make_batch(frame_index, &without_box, false)),
    }
}

fn make_batch(frame_index: usize, instances: &[&PvsInstancePrompt], use_boxes: bool) -> PromptBatch {
    let mut input_points = Vec::with_capacity(instances.len());
    let mut input_labels = Vec::with_capacity(instances.len());
    let mut input_boxes = Vec::new();
    let mut instance_ids = Vec::with_capacity(instances.len());

    for inst in instances {
        instance_ids.push(inst.instance_id);

        if inst.points.is_empty() {
            input_points.push(vec![[0.0, 0.0]]);
            input_labels.push(vec![PADDING_LABEL]);
        } else {
            input_points.push(
                inst.points
                    .iter()
                    .map(|p| [p.x as f32, p.y as f32])
                    .collect(),
            );
            input_labels.push(
                inst.points
                    .iter()
                    .map(|p| i32::from(p.is_positive))
                    .collect(),
            );
        }

        if use_boxes {
            if let Some(b) = inst.box_prompt {
                input_boxes.push([b.x_min as f32, b.y_min as f32, b.x_max as f32, b.y_max as f32]);
            }
        }
    }

    PromptBatch {
        frame_index,
        input_points,
        input_labels,
        input_boxes: use_boxes.then_some(input_boxes),
        instance_ids,
    }
}

/// Tight `[x_min, y_min, x_max, y_max]` box of a mask, `[0, 0, 0, 0]` when empty.
pub fn compute_bbox_from_mask(mask: &Mask) -> [i32; 4] {
    match mask.bounding_box() {
        Some((tl, br)) => [tl.x, tl.y, br.x, br.y],
        None => [0, 0, 0, 0],
    }
}

/// Sort each object's candidate masks by descending score, keep the top
/// `max_masks_per_object`, and flatten object-major.
///
/// `masks[o][k]` and `scores[o][k]` are candidate `k` of object `o`, whose
/// numeric id is `instance_ids[o]`.
pub fn sort_and_flatten(
    frame_index: usize,
    masks: Vec<Vec<Mask>>,
    scores: Vec<Vec<f32>>,
    instance_ids: &[u32],
    options: &MaskOutputOptions,
) -> FrameInferenceOutput {
    if masks.is_empty() || scores.is_empty() || instance_ids.is_empty() {
        return FrameInferenceOutput::empty(frame_index, "No masks produced by model");
    }

    let mut out = FrameInferenceOutput::empty(frame_index, "");
    out.meta.clear();

    for ((object_masks, object_scores), id) in masks.into_iter().zip(scores).zip(instance_ids) {
        let mut candidates: Vec<(Mask, f32)> = object_masks.into_iter().zip(object_scores).collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(options.max_masks_per_object);

        for (mask, score) in candidates {
            out.boxes.push(compute_bbox_from_mask(&mask));
            out.masks.push(mask);
            out.scores.push(score);
            out.instance_ids.push(*id);
        }
    }

    if out.is_empty() {
        return FrameInferenceOutput::empty(frame_index, "No masks produced by model");
    }
    out
}

/// Concatenate batch outputs of one frame, skipping empty ones.
pub fn merge_frame_outputs(
    frame_index: usize,
    outputs: impl IntoIterator<Item = FrameInferenceOutput>,
) -> FrameInferenceOutput {
    let mut merged = FrameInferenceOutput::empty(frame_index, "");
    merged.meta.clear();

    for out in outputs.into_iter().filter(|o| !o.is_empty()) {
        merged.masks.extend(out.masks);
        merged.scores.extend(out.scores);
        merged.boxes.extend(out.boxes);
        merged.instance_ids.extend(out.instance_ids);
        merged.meta.extend(out.meta);
    }

    if merged.is_empty() {
        return FrameInferenceOutput::empty(frame_index, "No masks produced by model");
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{PvsBoxPrompt, PvsPointPrompt};
    use proptest::prelude::*;

    fn point(x: i32, y: i32, is_positive: bool) -> PvsPointPrompt {
        PvsPointPrompt { x, y, is_positive }
    }

    fn bx(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> PvsBoxPrompt {
        PvsBoxPrompt {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    #[test]
    fn test_batches_split_by_box() {
        let instances = vec![
            PvsInstancePrompt {
                instance_id: 0,
                points: vec![point(1, 2, true), point(3, 4, false)],
                box_prompt: None,
            },
            PvsInstancePrompt {
                instance_id: 1,
                points: vec![],
                box_prompt: Some(bx(0, 0, 10, 10)),
            },
            PvsInstancePrompt {
                instance_id: 2,
                points: vec![],
                box_prompt: None,
            },
            PvsInstancePrompt {
                instance_id: 3,
                points: vec![point(5, 5, true)],
                box_prompt: Some(bx(2, 2, 8, 8)),
            },
        ];

        let batches = build_prompt_batches_for_frame(0, &instances);

        let with_box = batches.with_box.as_ref().unwrap();
        assert_eq!(with_box.instance_ids, vec![1, 3]);
        assert_eq!(with_box.input_points[0], vec![[0.0, 0.0]]);
        assert_eq!(with_box.input_labels[0], vec![PADDING_LABEL]);
        assert_eq!(with_box.input_labels[1], vec![1]);
        assert_eq!(
            with_box.input_boxes.as_ref().unwrap(),
            &vec![[0.0, 0.0, 10.0, 10.0], [2.0, 2.0, 8.0, 8.0]]
        );

        let without_box = batches.without_box.as_ref().unwrap();
        assert_eq!(without_box.instance_ids, vec![0]);
        assert_eq!(without_box.input_labels[0], vec![1, 0]);
        assert!(without_box.input_boxes.is_none());

        let names: Vec<_> = batches.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["with_box", "without_box"]);
    }

    #[test]
    fn test_batches_empty_when_nothing_to_prompt() {
        let instances = vec![PvsInstancePrompt {
            instance_id: 0,
            points: vec![],
            box_prompt: None,
        }];
        assert!(build_prompt_batches_for_frame(0, &instances).is_empty());
        assert!(build_prompt_batches_for_frame(0, &[]).is_empty());
    }

    fn square_mask(x0: u32, y0: u32, size: u32) -> Mask {
        Mask::from_fn(16, 16, |x, y| {
            (x0..x0 + size).contains(&x) && (y0..y0 + size).contains(&y)
        })
    }

    #[test]
    fn test_sort_and_flatten_orders_and_truncates() {
        let masks = vec![
            vec![square_mask(0, 0, 2), square_mask(4, 4, 3), square_mask(1, 1, 1)],
            vec![square_mask(8, 8, 4), Mask::new(16, 16)],
        ];
        let scores = vec![vec![0.2, 0.9, 0.5], vec![0.1, 0.3]];
        let options = MaskOutputOptions {
            max_masks_per_object: 2,
            mask_threshold: None,
        };

        let out = sort_and_flatten(0, masks, scores, &[7, 9], &options);

        assert_eq!(out.instance_ids, vec![7, 7, 9, 9]);
        assert_eq!(out.scores, vec![0.9, 0.5, 0.3, 0.1]);
        assert_eq!(out.boxes[0], [4, 4, 6, 6]);
        assert_eq!(out.boxes[1], [1, 1, 1, 1]);
        assert_eq!(out.boxes[2], [0, 0, 0, 0]);
        assert_eq!(out.boxes[3], [8, 8, 11, 11]);
    }

    #[test]
    fn test_sort_and_flatten_empty_input() {
        let out = sort_and_flatten(2, vec![], vec![], &[], &MaskOutputOptions::default());
        assert!(out.is_empty());
        assert_eq!(out.frame_index, 2);
    }

    #[test]
    fn test_merge_skips_empty_batches() {
        let a = sort_and_flatten(
            0,
            vec![vec![square_mask(0, 0, 2)]],
            vec![vec![0.8]],
            &[1],
            &MaskOutputOptions::default(),
        );
        let b = FrameInferenceOutput::empty(0, "nothing");
        let c = sort_and_flatten(
            0,
            vec![vec![square_mask(3, 3, 2)]],
            vec![vec![0.6]],
            &[0],
            &MaskOutputOptions::default(),
        );

        let merged = merge_frame_outputs(0, [a, b, c]);
        assert_eq!(merged.instance_ids, vec![1, 0]);
        assert_eq!(merged.len(), 2);
        assert!(!merged.meta.contains_key("message"));

        let none = merge_frame_outputs(0, [FrameInferenceOutput::empty(0, "x")]);
        assert!(none.is_empty());
    }

    proptest! {
        #[test]
        fn prop_sort_and_flatten_respects_top_k(
            scores in proptest::collection::vec(proptest::collection::vec(0.0f32..1.0, 1..5), 1..4),
            k in 1usize..4,
        ) {
            let ids: Vec<u32> = (0..scores.len() as u32).collect();
            let masks: Vec<Vec<Mask>> = scores
                .iter()
                .map(|s| s.iter().map(|_| Mask::new(2, 2)).collect())
                .collect();
            let options = MaskOutputOptions { max_masks_per_object: k, mask_threshold: None };

            let out = sort_and_flatten(0, masks, scores.clone(), &ids, &options);

            for (o, object_scores) in scores.iter().enumerate() {
                let kept: Vec<f32> = out
                    .instance_ids
                    .iter()
                    .zip(&out.scores)
                    .filter(|(id, _)| **id == o as u32)
                    .map(|(_, s)| *s)
                    .collect();
                prop_assert_eq!(kept.len(), object_scores.len().min(k));
                prop_assert!(kept.windows(2).all(|w| w[0] >= w[1]));
            }
        }
    }
}
