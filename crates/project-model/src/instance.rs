//! Instances and their per-frame detections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{FrameId, InstanceId, PixelXY};
use crate::mask::Mask;

/// Model output for one instance on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetection {
    pub frame_id: FrameId,
    pub top_left: PixelXY,
    pub bottom_right: PixelXY,

    /// Binary mask at frame resolution.
    #[serde(default)]
    pub mask: Option<Mask>,

    /// Model confidence, when reported.
    #[serde(default)]
    pub score: Option<f32>,
}

/// A user-defined annotated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub instance_name: String,
    #[serde(default)]
    pub category_name: Option<String>,

    /// Detections keyed by frame.
    #[serde(default)]
    pub detections: BTreeMap<FrameId, InstanceDetection>,
}

impl Instance {
    pub fn new(
        instance_id: InstanceId,
        instance_name: impl Into<String>,
        category_name: Option<String>,
    ) -> Self {
        Self {
            instance_id,
            instance_name: instance_name.into(),
            category_name,
            detections: BTreeMap::new(),
        }
    }

    /// Detection on `frame_id`, if any.
    pub fn detection(&self, frame_id: FrameId) -> Option<&InstanceDetection> {
        self.detections.get(&frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_lookup() {
        let mut instance = Instance::new(InstanceId(3), "car", Some("vehicle".into()));
        assert!(instance.detection(FrameId(0)).is_none());

        instance.detections.insert(
            FrameId(5),
            InstanceDetection {
                frame_id: FrameId(5),
                top_left: PixelXY::new(1, 2),
                bottom_right: PixelXY::new(3, 4),
                mask: None,
                score: Some(0.9),
            },
        );
        let det = instance.detection(FrameId(5)).unwrap();
        assert_eq!(det.bottom_right, PixelXY::new(3, 4));
    }

    #[test]
    fn test_instance_defaults_when_fields_missing() {
        let json = r#"{"instance_id": 1, "instance_name": "a"}"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert!(instance.category_name.is_none());
        assert!(instance.detections.is_empty());
    }
}
