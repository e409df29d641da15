//! Project file (`annotations.json`).
//!
//! A project directory holds a single JSON document with the annotated
//! frames, the instances, their prompts and the model detections. Frames are
//! stored by their load info (usually the image path) so a project can be
//! reopened against the same sequence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::annotation::{BBoxAnnotation, PointAnnotation};
use crate::colour::Rgb;
use crate::ids::{FrameId, InstanceId};
use crate::instance::InstanceDetection;

/// File name of the project document inside a project directory.
pub const PROJECT_FILE_NAME: &str = "annotations.json";

/// Current schema version.
pub const PROJECT_VERSION: &str = "1.0";

/// Persisted instance, without its detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub instance_name: String,
    #[serde(default)]
    pub category_name: Option<String>,
    pub colour: Rgb,
}

/// Top-level project document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationProject {
    /// Schema version.
    pub version: String,

    /// Creation timestamp (RFC 3339).
    pub created_at: String,

    /// Last modified timestamp (RFC 3339).
    pub modified_at: String,

    /// Load info of every annotated frame.
    #[serde(default)]
    pub frames: BTreeMap<FrameId, String>,

    #[serde(default)]
    pub instances: BTreeMap<InstanceId, InstanceRecord>,

    #[serde(default)]
    pub point_annotations: BTreeMap<FrameId, Vec<PointAnnotation>>,

    #[serde(default)]
    pub bbox_annotations: BTreeMap<FrameId, Vec<BBoxAnnotation>>,

    #[serde(default)]
    pub detections: BTreeMap<InstanceId, Vec<InstanceDetection>>,
}

impl Default for AnnotationProject {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationProject {
    /// Empty project stamped with the current time.
    pub fn new() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            version: PROJECT_VERSION.to_string(),
            created_at: now.clone(),
            modified_at: now,
            frames: BTreeMap::new(),
            instances: BTreeMap::new(),
            point_annotations: BTreeMap::new(),
            bbox_annotations: BTreeMap::new(),
            detections: BTreeMap::new(),
        }
    }

    /// Path of the project document inside `dir`.
    pub fn file_path(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(PROJECT_FILE_NAME)
    }

    /// Load the project document from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = Self::file_path(dir);

        let json = std::fs::read_to_string(&path).map_err(|e| ProjectError::IoError {
            path: path.clone(),
            source: e,
        })?;

        let project: AnnotationProject =
            serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
                path: path.clone(),
                source: e,
            })?;

        tracing::debug!(
            path = %path.display(),
            frames = project.frames.len(),
            instances = project.instances.len(),
            "Loaded project"
        );
        Ok(project)
    }

    /// Write the project document into `dir`, creating it if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), ProjectError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| ProjectError::IoError {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let path = Self::file_path(dir);
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| ProjectError::IoError {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!(path = %path.display(), "Saved project");
        Ok(())
    }

    /// Update the modification timestamp.
    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().to_rfc3339();
    }

    /// Number of point annotations across all frames.
    pub fn point_count(&self) -> usize {
        self.point_annotations.values().map(Vec::len).sum()
    }

    /// Number of bbox annotations across all frames.
    pub fn bbox_count(&self) -> usize {
        self.bbox_annotations.values().map(Vec::len).sum()
    }

    /// Check that every annotation and detection references a listed frame
    /// and a known instance.
    pub fn validate(&self) -> Result<(), ProjectError> {
        let mut problems = Vec::new();

        for (frame_id, points) in &self.point_annotations {
            if !self.frames.contains_key(frame_id) {
                problems.push(format!("points on unlisted frame {frame_id}"));
            }
            for pa in points {
                if pa.frame_id != *frame_id {
                    problems.push(format!(
                        "point {} stored under frame {frame_id} but belongs to frame {}",
                        pa.point_id, pa.frame_id
                    ));
                }
                if !self.instances.contains_key(&pa.instance_id) {
                    problems.push(format!(
                        "point {} references unknown instance {}",
                        pa.point_id, pa.instance_id
                    ));
                }
            }
        }

        for (frame_id, bboxes) in &self.bbox_annotations {
            if !self.frames.contains_key(frame_id) {
                problems.push(format!("boxes on unlisted frame {frame_id}"));
            }
            for ba in bboxes {
                if ba.frame_id != *frame_id {
                    problems.push(format!(
                        "bbox {} stored under frame {frame_id} but belongs to frame {}",
                        ba.bbox_id, ba.frame_id
                    ));
                }
                if !self.instances.contains_key(&ba.instance_id) {
                    problems.push(format!(
                        "bbox {} references unknown instance {}",
                        ba.bbox_id, ba.instance_id
                    ));
                }
            }
        }

        for instance_id in self.detections.keys() {
            if !self.instances.contains_key(instance_id) {
                problems.push(format!("detections for unknown instance {instance_id}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProjectError::ValidationError {
                message: problems.join("; "),
            })
        }
    }
}

/// Errors related to project file operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}
