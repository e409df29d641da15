//! Application session: ties frames, instances, annotations and the model
//! together.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use samnotator_common::{AppConfig, SamnotatorError, SamnotatorResult};
use samnotator_inference::{
    InferenceRequest, InferenceResult, MaskOutputOptions, ModelController, ModelEvent, ModelInfo,
    ModelRegistry, PvsVideoOptions,
};
use samnotator_project_model::{
    AnnotationProject, BBox, BBoxAnnotation, Change, ColourGenerator, FrameId, Instance,
    InstanceDetection, InstanceId, InstanceRecord, PixelXY, Point, PointAnnotation, Rgb,
};

use crate::annotations::AnnotationController;
use crate::events::ControllerEvent;
use crate::frames::{frame_sources_from_paths, ExtensionFilter, FrameController};
use crate::instances::{InstanceController, InstanceInfo, InstanceUpdate, MarkerSizes};
use crate::prompt::{build_image_request, build_video_request, RequestIdGenerator};

/// The whole editing session.
pub struct AppController {
    pub frames: FrameController,
    pub instances: InstanceController,
    pub annotations: AnnotationController,
    pub model: ModelController,
    device: String,
    output_options: MaskOutputOptions,
    extension_filter: ExtensionFilter,
    colours: ColourGenerator,
    request_ids: RequestIdGenerator,
    pending: Vec<ControllerEvent>,
}

impl AppController {
    /// Session with the built-in model backends.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_model_controller(
            config,
            ModelController::new(ModelRegistry::with_defaults(config)),
        )
    }

    /// Session driving the given model controller.
    pub fn with_model_controller(config: &AppConfig, model: ModelController) -> Self {
        Self {
            frames: FrameController::new(),
            instances: InstanceController::with_marker_sizes(MarkerSizes::new(
                config.annotation.marker_size,
                config.annotation.bbox_handle_size,
            )),
            annotations: AnnotationController::new(),
            model,
            device: config.device.clone(),
            output_options: MaskOutputOptions {
                max_masks_per_object: config.annotation.max_masks_per_object.max(1),
                mask_threshold: Some(config.annotation.mask_threshold),
            },
            extension_filter: if config.annotation.image_extensions.is_empty() {
                ExtensionFilter::Default
            } else {
                ExtensionFilter::custom(&config.annotation.image_extensions)
            },
            colours: ColourGenerator::new(),
            request_ids: RequestIdGenerator::new(),
            pending: Vec::new(),
        }
    }

    /// Clear frames and annotations.
    pub fn reset(&mut self) {
        self.frames.reset(None);
        self.annotations.reset();
    }

    // --- Frames ---

    /// Replace the frame sequence, or clear it with `None`.
    pub fn load_frames_from_paths(&mut self, paths: Option<&[PathBuf]>) {
        match paths {
            None => self.frames.reset(None),
            Some(paths) => self
                .frames
                .reset(Some(frame_sources_from_paths(paths, false, None))),
        }
    }

    /// Open a folder or an image. Annotations and detections of the
    /// previous sequence are dropped.
    pub fn open_path(&mut self, path: &Path) -> SamnotatorResult<()> {
        if !path.exists() {
            return Err(SamnotatorError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        self.annotations.reset();
        self.clear_detections()?;
        self.frames.open_path_filtered(path, &self.extension_filter)
    }

    fn clear_detections(&mut self) -> SamnotatorResult<()> {
        for instance_id in self.instances.ids() {
            let has_detections = self
                .instances
                .get(instance_id)
                .is_some_and(|info| !info.instance.detections.is_empty());
            if has_detections {
                self.instances.update_instance(
                    instance_id,
                    InstanceUpdate {
                        detections: Some(BTreeMap::new()),
                        ..Default::default()
                    },
                )?;
            }
        }
        Ok(())
    }

    // --- Instances and annotations ---

    /// Create an instance, picking an unused colour when none is given.
    pub fn create_instance(
        &mut self,
        name: impl Into<String>,
        colour: Option<Rgb>,
        category_name: Option<String>,
    ) -> InstanceId {
        let colour = colour.unwrap_or_else(|| self.colours.next(&self.instances.used_colours()));
        self.instances.create_instance(name, colour, category_name)
    }

    /// Add a point on the current frame for the current instance.
    pub fn request_point_annotation(&mut self, point: Point) -> Option<PointAnnotation> {
        let frame_id = self.frames.current_frame_id()?;
        let instance_id = self.instances.current_instance_id()?;
        self.annotations.create_point(frame_id, instance_id, point)
    }

    /// Add a box on the current frame for the current instance.
    pub fn request_bbox_annotation(&mut self, bbox: BBox) -> Option<BBoxAnnotation> {
        let frame_id = self.frames.current_frame_id()?;
        let instance_id = self.instances.current_instance_id()?;
        Some(self.annotations.create_bbox(frame_id, instance_id, bbox))
    }

    /// Apply cross-controller rules to queued events and keep them for
    /// [`AppController::process_events`].
    fn settle(&mut self) {
        loop {
            let mut events = self.frames.drain_events();
            events.extend(self.instances.drain_events());
            events.extend(self.annotations.drain_events());
            if events.is_empty() {
                break;
            }
            for event in &events {
                if let ControllerEvent::InstanceChanged(instance_id, Change::Delete) = event {
                    self.annotations.delete_instance(*instance_id);
                }
            }
            self.pending.extend(events);
        }
    }

    /// Collect what changed since the last call, oldest first.
    ///
    /// Deleting an instance deletes its annotations; the resulting events
    /// are included.
    pub fn process_events(&mut self) -> Vec<ControllerEvent> {
        self.settle();
        std::mem::take(&mut self.pending)
    }

    // --- Model ---

    /// Load `model` on the configured device.
    pub fn load_model(&mut self, model: &ModelInfo) -> SamnotatorResult<()> {
        self.model
            .load_model(&model.wrapper_name, &model.model_path, &self.device)
    }

    fn with_output_options(&self, mut request: InferenceRequest) -> InferenceRequest {
        request.input.task.output_options = self.output_options.clone();
        request
    }

    /// Request for the current frame, with ids drawn for `model_name`.
    pub fn build_current_frame_request(
        &mut self,
        model_name: &str,
    ) -> SamnotatorResult<InferenceRequest> {
        let frame_id = self
            .frames
            .current_frame_id()
            .ok_or_else(|| SamnotatorError::frame("No frame"))?;
        let path = self.frames.frame_path(frame_id)?.ok_or_else(|| {
            SamnotatorError::frame("Frame controller returned no image path for requested frame")
        })?;

        let request_id = self.request_ids.next_id(model_name);
        let request = build_image_request(request_id, frame_id, path, &self.annotations)
            .map_err(|e| SamnotatorError::prompt(e.to_string()))?;
        Ok(self.with_output_options(request))
    }

    /// Propagation request over the whole sequence.
    pub fn build_sequence_request(
        &mut self,
        model_name: &str,
        video_options: PvsVideoOptions,
    ) -> SamnotatorResult<InferenceRequest> {
        let mut frames = Vec::with_capacity(self.frames.len());
        for frame_id in self.frames.frame_ids() {
            let path = self.frames.frame_path(frame_id)?.ok_or_else(|| {
                SamnotatorError::frame(format!("Frame {frame_id} has no image path"))
            })?;
            frames.push((frame_id, path));
        }
        if frames.is_empty() {
            return Err(SamnotatorError::frame("No frame"));
        }

        let request_id = self.request_ids.next_id(model_name);
        let request = build_video_request(request_id, &frames, &self.annotations, video_options)
            .map_err(|e| SamnotatorError::prompt(e.to_string()))?;
        Ok(self.with_output_options(request))
    }

    /// Submit a request; returns its id.
    pub fn submit(&mut self, request: InferenceRequest) -> SamnotatorResult<String> {
        let request_id = request.request_id.clone();
        self.model.run_inference(request)?;
        Ok(request_id)
    }

    /// Poll the model, applying finished results to the instances.
    pub fn poll_model(&mut self) -> Vec<ModelEvent> {
        let events = self.model.poll();
        for event in &events {
            if let ModelEvent::Result(result) = event {
                self.apply_inference_result(result);
            }
        }
        events
    }

    /// Store the detections of a finished request on their instances.
    ///
    /// New detections replace existing ones on the same frame; detections on
    /// other frames are kept. Returns the number of detections stored.
    pub fn apply_inference_result(&mut self, result: &InferenceResult) -> usize {
        let request = &result.request;
        let Some(data) = result.output.data.as_ref().filter(|_| result.output.is_ok()) else {
            tracing::warn!(
                request_id = %request.request_id,
                error = result.output.error.as_deref().unwrap_or("no data"),
                "Inference failed"
            );
            return 0;
        };

        let mut by_instance: HashMap<InstanceId, BTreeMap<FrameId, InstanceDetection>> =
            HashMap::new();
        for (frame_index, frame) in &data.frame_results {
            let Some(&frame_id) = request.frame_mapping.get(frame_index) else {
                tracing::debug!(frame_index, "No frame mapping, skipping output");
                continue;
            };
            for (i, object_id) in frame.instance_ids.iter().enumerate() {
                let Some(&instance_id) = request.instance_mapping.get(object_id) else {
                    tracing::debug!(object_id, "No instance mapping, skipping object");
                    continue;
                };
                let Some(&[x_min, y_min, x_max, y_max]) = frame.boxes.get(i) else {
                    continue;
                };
                // Candidates are sorted best first; keep the first per frame.
                by_instance
                    .entry(instance_id)
                    .or_default()
                    .entry(frame_id)
                    .or_insert_with(|| InstanceDetection {
                        frame_id,
                        top_left: PixelXY::new(x_min, y_min),
                        bottom_right: PixelXY::new(x_max, y_max),
                        mask: frame.masks.get(i).cloned(),
                        score: frame.scores.get(i).copied(),
                    });
            }
        }

        let mut stored = 0;
        for (instance_id, detections) in by_instance {
            let Some(info) = self.instances.get(instance_id) else {
                tracing::debug!(%instance_id, "Instance gone, dropping detections");
                continue;
            };
            stored += detections.len();
            let mut merged = info.instance.detections.clone();
            merged.extend(detections);
            let update = InstanceUpdate {
                detections: Some(merged),
                ..Default::default()
            };
            if let Err(e) = self.instances.update_instance(instance_id, update) {
                tracing::warn!(%instance_id, error = %e, "Failed to store detections");
            }
        }

        tracing::info!(
            request_id = %request.request_id,
            detections = stored,
            "Applied inference result"
        );
        stored
    }

    // --- Persistence ---

    /// Build the project document for the current session.
    pub fn to_project(&self) -> AnnotationProject {
        let mut project = AnnotationProject::new();

        let mut frame_ids = self.annotations.frames_with_annotations();
        for info in self.instances.iter() {
            frame_ids.extend(info.instance.detections.keys().copied());
        }
        frame_ids.sort();
        frame_ids.dedup();

        for frame_id in frame_ids {
            match self.frames.frame_load_info(frame_id) {
                Ok(load_info) => {
                    project.frames.insert(frame_id, load_info);
                }
                Err(e) => tracing::warn!(%frame_id, error = %e, "Not saving unknown frame"),
            }

            let points = self.annotations.points_for_frame(frame_id);
            if !points.is_empty() {
                project.point_annotations.insert(frame_id, points);
            }
            let bboxes = self.annotations.bboxes_for_frame(frame_id);
            if !bboxes.is_empty() {
                project.bbox_annotations.insert(frame_id, bboxes);
            }
        }

        for info in self.instances.iter() {
            let instance = &info.instance;
            project.instances.insert(
                instance.instance_id,
                InstanceRecord {
                    instance_id: instance.instance_id,
                    instance_name: instance.instance_name.clone(),
                    category_name: instance.category_name.clone(),
                    colour: info.main_colour,
                },
            );
            if !instance.detections.is_empty() {
                project.detections.insert(
                    instance.instance_id,
                    instance.detections.values().cloned().collect(),
                );
            }
        }

        project
    }

    /// Write `annotations.json` into `dir`. Returns the file path.
    pub fn save_to_folder(&self, dir: &Path) -> SamnotatorResult<PathBuf> {
        self.to_project()
            .save(dir)
            .map_err(|e| SamnotatorError::project(e.to_string()))?;
        Ok(AnnotationProject::file_path(dir))
    }

    /// Replace instances and annotations with the project stored in `dir`.
    ///
    /// Frames are matched by load info against the open sequence. When no
    /// frames are open, the project's own frames are loaded.
    pub fn load_from_folder(&mut self, dir: &Path) -> SamnotatorResult<()> {
        let project =
            AnnotationProject::load(dir).map_err(|e| SamnotatorError::project(e.to_string()))?;

        if self.frames.is_empty() {
            let paths: Vec<PathBuf> = project.frames.values().map(PathBuf::from).collect();
            self.frames
                .reset(Some(frame_sources_from_paths(&paths, false, None)));
        }

        let mut by_load_info: HashMap<String, FrameId> = HashMap::new();
        for frame_id in self.frames.frame_ids() {
            by_load_info.insert(self.frames.frame_load_info(frame_id)?, frame_id);
        }
        let frame_map: HashMap<FrameId, FrameId> = project
            .frames
            .iter()
            .filter_map(|(saved, load_info)| match by_load_info.get(load_info) {
                Some(current) => Some((*saved, *current)),
                None => {
                    tracing::warn!(frame = %load_info, "Frame not in the open sequence, skipping");
                    None
                }
            })
            .collect();

        self.instances.clear();
        self.annotations.reset();
        self.settle();

        let mut detections = project.detections;
        for (instance_id, record) in project.instances {
            let mut instance = Instance::new(instance_id, record.instance_name, record.category_name);
            for mut detection in detections.remove(&instance_id).unwrap_or_default() {
                if let Some(&frame_id) = frame_map.get(&detection.frame_id) {
                    detection.frame_id = frame_id;
                    instance.detections.insert(frame_id, detection);
                }
            }
            let sizes = self.instances.marker_sizes();
            self.instances
                .insert(InstanceInfo::with_sizes(instance, record.colour, sizes));
        }

        let mut restored = 0;
        for mut pa in project.point_annotations.into_values().flatten() {
            let Some(&frame_id) = frame_map.get(&pa.frame_id) else {
                continue;
            };
            pa.frame_id = frame_id;
            if self.annotations.restore_point(pa) {
                restored += 1;
            } else {
                tracing::warn!(point_id = %pa.point_id, "Duplicate point in project, skipping");
            }
        }
        for mut ba in project.bbox_annotations.into_values().flatten() {
            let Some(&frame_id) = frame_map.get(&ba.frame_id) else {
                continue;
            };
            ba.frame_id = frame_id;
            if self.annotations.restore_bbox(ba) {
                restored += 1;
            }
        }

        tracing::info!(
            dir = %dir.display(),
            instances = self.instances.len(),
            annotations = restored,
            "Loaded project"
        );
        Ok(())
    }
}
