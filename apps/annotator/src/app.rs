use std::collections::HashMap;
use std::path::{Path, PathBuf};

use eframe::egui::{self, Color32};
use samnotator_common::{AppConfig, SamnotatorResult};
use samnotator_controllers::{AppController, ControllerEvent};
use samnotator_inference::{configured_models, InferenceRequest, ModelEvent, ModelInfo, PvsVideoOptions};
use samnotator_project_model::{FrameId, InstanceId, PixelXY};

use crate::canvas::{self, CanvasTool, CanvasView};

const MAX_LOG_LINES: usize = 200;

pub struct AnnotatorApp {
    pub(crate) config: AppConfig,
    pub(crate) session: AppController,
    view: CanvasView,
    tool: CanvasTool,
    /// Texture of the current frame, `None` inside when it failed to load.
    frame_texture: Option<(FrameId, Option<egui::TextureHandle>)>,
    mask_textures: HashMap<(InstanceId, FrameId), egui::TextureHandle>,
    pub(crate) fit_pending: bool,
    pub(crate) hover: Option<PixelXY>,
    pub(crate) models: Vec<ModelInfo>,
    pub(crate) selected_model: usize,
    pub(crate) video_options: PvsVideoOptions,
    pub(crate) active_request: Option<String>,
    pub(crate) progress: f32,
    pub(crate) log: Vec<String>,
    pub(crate) status: String,
    pub(crate) path_input: String,
    pub(crate) project_input: String,
    pub(crate) new_instance_name: String,
    pub(crate) new_instance_category: String,
}

impl AnnotatorApp {
    pub fn new(config: AppConfig, path: Option<PathBuf>) -> Self {
        let session = AppController::new(&config);
        let models = configured_models(&config);

        let mut app = Self {
            config,
            session,
            view: CanvasView::default(),
            tool: CanvasTool::default(),
            frame_texture: None,
            mask_textures: HashMap::new(),
            fit_pending: true,
            hover: None,
            models,
            selected_model: 0,
            video_options: PvsVideoOptions::default(),
            active_request: None,
            progress: 0.0,
            log: Vec::new(),
            status: "Ready".to_string(),
            path_input: String::new(),
            project_input: String::new(),
            new_instance_name: String::new(),
            new_instance_category: String::new(),
        };

        if let Some(path) = path {
            app.path_input = path.display().to_string();
            app.open_path();
        }
        app
    }

    pub(crate) fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            self.log.drain(..excess);
        }
    }

    // --- Files ---

    pub(crate) fn open_path(&mut self) {
        let path = PathBuf::from(self.path_input.trim());
        match self.session.open_path(&path) {
            Ok(()) => {
                self.status = format!(
                    "Opened {} frame(s) from {}",
                    self.session.frames.len(),
                    path.display()
                );
                if self.project_input.trim().is_empty() {
                    self.project_input = project_dir_for(&path).display().to_string();
                }
                self.fit_pending = true;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to open");
                self.status = format!("Failed to open: {e}");
            }
        }
    }

    pub(crate) fn save_project(&mut self) {
        let dir = PathBuf::from(self.project_input.trim());
        self.status = match self.session.save_to_folder(&dir) {
            Ok(path) => format!("Saved {}", path.display()),
            Err(e) => format!("Failed to save: {e}"),
        };
    }

    pub(crate) fn load_project(&mut self) {
        let dir = PathBuf::from(self.project_input.trim());
        let had_frames = !self.session.frames.is_empty();
        self.tool.cancel();
        self.status = match self.session.load_from_folder(&dir) {
            Ok(()) => {
                self.fit_pending |= !had_frames;
                format!(
                    "Loaded {} instance(s), {} point(s), {} box(es)",
                    self.session.instances.len(),
                    self.session.annotations.point_count(),
                    self.session.annotations.bbox_count()
                )
            }
            Err(e) => format!("Failed to load project: {e}"),
        };
    }

    // --- Instances ---

    pub(crate) fn add_instance(&mut self) {
        let name = match self.new_instance_name.trim() {
            "" => format!("instance {}", self.session.instances.len() + 1),
            name => name.to_string(),
        };
        let category = Some(self.new_instance_category.trim().to_string()).filter(|c| !c.is_empty());
        let instance_id = self.session.create_instance(name, None, category);
        if let Err(e) = self.session.instances.set_current_instance(Some(instance_id)) {
            self.status = e.to_string();
        }
        self.new_instance_name.clear();
    }

    // --- Model ---

    pub(crate) fn load_selected_model(&mut self) {
        let Some(model) = self.models.get(self.selected_model).cloned() else {
            self.status = "No model configured".to_string();
            return;
        };
        self.active_request = None;
        match self.session.load_model(&model) {
            Ok(()) => {
                self.push_log(format!(
                    "Loading {} ({}) from {}",
                    model.name,
                    model.wrapper_name,
                    model.model_path.display()
                ));
                self.status = format!("Model {} loading", model.name);
            }
            Err(e) => self.status = format!("Failed to load model: {e}"),
        }
    }

    pub(crate) fn unload_model(&mut self) {
        for event in self.session.model.unload_model() {
            self.handle_model_event(event);
        }
        self.active_request = None;
        self.status = "Model unloaded".to_string();
    }

    fn model_name(&self) -> String {
        self.models
            .get(self.selected_model)
            .map_or_else(|| "model".to_string(), |m| m.name.clone())
    }

    fn submit(&mut self, request: SamnotatorResult<InferenceRequest>) {
        match request.and_then(|r| self.session.submit(r)) {
            Ok(request_id) => {
                self.status = format!("Running {request_id}");
                self.active_request = Some(request_id);
                self.progress = 0.0;
            }
            Err(e) => self.status = format!("Inference not started: {e}"),
        }
    }

    pub(crate) fn run_current_frame(&mut self) {
        let name = self.model_name();
        let request = self.session.build_current_frame_request(&name);
        self.submit(request);
    }

    pub(crate) fn run_sequence(&mut self) {
        let name = self.model_name();
        let request = self
            .session
            .build_sequence_request(&name, self.video_options.clone());
        self.submit(request);
    }

    fn poll_model(&mut self) {
        for event in self.session.poll_model() {
            self.handle_model_event(event);
        }
    }

    pub(crate) fn handle_model_event(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::Result(result) => {
                let request_id = result.request.request_id.clone();
                if self.active_request.as_deref() == Some(request_id.as_str()) {
                    self.active_request = None;
                    self.progress = 1.0;
                }
                self.status = match result.output.error.as_deref() {
                    Some(error) => format!("{request_id} failed: {error}"),
                    None => format!("{request_id} finished"),
                };
                let line = self.status.clone();
                self.push_log(line);
            }
            ModelEvent::Progress {
                request_id,
                progress,
                message,
            } => {
                self.progress = progress;
                if let Some(message) = message {
                    self.push_log(format!("{request_id}: {message}"));
                }
            }
            ModelEvent::Log(line) => self.push_log(line),
        }
    }

    // --- Canvas ---

    fn handle_controller_events(&mut self) {
        for event in self.session.process_events() {
            match event {
                ControllerEvent::CurrentFrameChanged(_) => self.frame_texture = None,
                ControllerEvent::InstanceChanged(instance_id, _) => {
                    self.mask_textures.retain(|(id, _), _| *id != instance_id);
                }
                _ => {}
            }
        }
        self.tool.sync(&self.session);
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (delete, toggle, next, previous) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace),
                i.key_pressed(egui::Key::T),
                i.key_pressed(egui::Key::ArrowRight),
                i.key_pressed(egui::Key::ArrowLeft),
            )
        });
        if delete {
            self.tool.delete_selected(&mut self.session);
        }
        if toggle {
            self.tool.toggle_selected(&mut self.session);
        }
        if next {
            self.session.frames.next_frame();
        }
        if previous {
            self.session.frames.previous_frame();
        }
    }

    fn frame_texture(&mut self, ctx: &egui::Context, frame_id: FrameId) -> Option<egui::TextureHandle> {
        if let Some((id, texture)) = &self.frame_texture {
            if *id == frame_id {
                return texture.clone();
            }
        }
        let texture = match self.session.frames.load_frame(frame_id) {
            Ok(rgba) => {
                let size = [rgba.width() as usize, rgba.height() as usize];
                let image = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
                Some(ctx.load_texture(
                    format!("frame-{frame_id}"),
                    image,
                    egui::TextureOptions::NEAREST,
                ))
            }
            Err(e) => {
                tracing::warn!(%frame_id, error = %e, "Failed to load frame");
                self.status = format!("Failed to load frame {frame_id}: {e}");
                None
            }
        };
        self.frame_texture = Some((frame_id, texture.clone()));
        texture
    }

    fn mask_texture(
        &mut self,
        ctx: &egui::Context,
        instance_id: InstanceId,
        frame_id: FrameId,
    ) -> Option<egui::TextureHandle> {
        if let Some(texture) = self.mask_textures.get(&(instance_id, frame_id)) {
            return Some(texture.clone());
        }
        let info = self.session.instances.get(instance_id)?;
        let mask = info.instance.detection(frame_id)?.mask.as_ref()?;
        let opacity = if info.show_plain_mask {
            1.0
        } else {
            self.config.annotation.mask_opacity
        };
        let texture = ctx.load_texture(
            format!("mask-{instance_id}-{frame_id}"),
            canvas::mask_image(mask, info.main_colour, opacity),
            egui::TextureOptions::NEAREST,
        );
        self.mask_textures
            .insert((instance_id, frame_id), texture.clone());
        Some(texture)
    }

    fn canvas_ui(&mut self, ui: &mut egui::Ui) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let rect = response.rect;
        let painter = painter.with_clip_rect(rect);
        painter.rect_filled(rect, 0.0, Color32::from_gray(24));

        let Some(frame_id) = self.session.frames.current_frame_id() else {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Open an image or a folder of images",
                egui::FontId::proportional(18.0),
                Color32::GRAY,
            );
            self.hover = None;
            return;
        };
        let Some(texture) = self.frame_texture(ui.ctx(), frame_id) else {
            self.hover = None;
            return;
        };
        let size = texture.size();
        if self.fit_pending {
            self.view.fit(rect, size);
            self.fit_pending = false;
        }

        let image_rect = self.view.image_rect(rect, size);
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        painter.image(texture.id(), image_rect, uv, Color32::WHITE);

        let masked: Vec<InstanceId> = self
            .session
            .instances
            .iter()
            .filter(|info| info.show_mask && info.instance.detection(frame_id).is_some())
            .map(|info| info.id())
            .collect();
        for instance_id in masked {
            if let Some(mask) = self.mask_texture(ui.ctx(), instance_id, frame_id) {
                painter.image(mask.id(), image_rect, uv, Color32::WHITE);
            }
        }

        canvas::paint_annotations(&painter, &self.view, rect, &self.session, frame_id, &self.tool);

        self.handle_pointer(ui, &response, rect, size);
    }

    fn handle_pointer(
        &mut self,
        ui: &egui::Ui,
        response: &egui::Response,
        rect: egui::Rect,
        size: [usize; 2],
    ) {
        let (pointer, primary_pressed, primary_released, secondary_pressed, panning, delta, scroll) =
            ui.input(|i| {
                (
                    i.pointer.interact_pos(),
                    i.pointer.button_pressed(egui::PointerButton::Primary),
                    i.pointer.button_released(egui::PointerButton::Primary),
                    i.pointer.button_pressed(egui::PointerButton::Secondary),
                    i.pointer.button_down(egui::PointerButton::Middle),
                    i.pointer.delta(),
                    i.raw_scroll_delta.y,
                )
            });

        let in_image = |p: PixelXY| {
            p.x >= 0 && p.y >= 0 && (p.x as usize) < size[0] && (p.y as usize) < size[1]
        };
        self.hover = response
            .hover_pos()
            .map(|pos| self.view.to_image(rect, pos))
            .filter(|p| in_image(*p));

        let Some(pos) = pointer else {
            return;
        };
        let pixel = self.view.to_image(rect, pos);
        let radius = self
            .view
            .hit_radius(self.session.instances.marker_sizes().marker_size);

        if response.hovered() {
            if primary_pressed && in_image(pixel) {
                self.tool.primary_pressed(&self.session, pixel, radius);
            }
            if secondary_pressed && in_image(pixel) {
                if let Some(hint) = self.tool.secondary_pressed(&mut self.session, pixel, radius) {
                    self.status = hint.to_string();
                }
            }
            if panning {
                self.view.pan += delta;
            }
            self.view.scroll_zoom(rect, pos, scroll);
        }

        if self.tool.drag().is_some() {
            let clamped = PixelXY::new(
                pixel.x.clamp(0, size[0] as i32 - 1),
                pixel.y.clamp(0, size[1] as i32 - 1),
            );
            self.tool.pointer_moved(clamped);
            if primary_released {
                if let Some(hint) = self.tool.primary_released(&mut self.session, clamped) {
                    self.status = hint.to_string();
                }
            }
        }
    }
}

/// Where a project for `path` is saved by default.
fn project_dir_for(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

impl eframe::App for AnnotatorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
        self.poll_model();
        self.handle_keys(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar_ui(ui));
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| self.status_ui(ui));
        egui::SidePanel::right("side")
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.instance_panel(ui);
                    ui.separator();
                    self.model_panel(ui);
                });
            });
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.canvas_ui(ui));

        self.handle_controller_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samnotator_inference::{InferenceInput, InferenceResult, ModelOutput, PvsTask, TaskType};

    #[test]
    fn test_missing_path_reports_status() {
        let app = AnnotatorApp::new(
            AppConfig::default(),
            Some(PathBuf::from("/nonexistent/samnotator/frames")),
        );
        assert!(app.status.starts_with("Failed to open"));
        assert!(app.session.frames.is_empty());
    }

    #[test]
    fn test_opening_folder_sets_project_dir() {
        let dir = std::env::temp_dir().join("samnotator_app_open");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        image::RgbImage::new(8, 8).save(dir.join("a.png")).unwrap();

        let app = AnnotatorApp::new(AppConfig::default(), Some(dir.clone()));
        assert_eq!(app.session.frames.len(), 1);
        assert_eq!(app.project_input, dir.display().to_string());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_model_events_update_progress_and_log() {
        let mut app = AnnotatorApp::new(AppConfig::default(), None);
        app.active_request = Some("m:0".into());

        app.handle_model_event(ModelEvent::Progress {
            request_id: "m:0".into(),
            progress: 0.5,
            message: Some("frame 3".into()),
        });
        assert_eq!(app.progress, 0.5);
        assert_eq!(app.log.last().map(String::as_str), Some("m:0: frame 3"));

        let request = InferenceRequest {
            request_id: "m:0".into(),
            frame_mapping: Default::default(),
            instance_mapping: Default::default(),
            input: InferenceInput {
                task_type: TaskType::Pvs,
                task: PvsTask {
                    frame_prompts: Vec::new(),
                    video_options: None,
                    output_options: Default::default(),
                },
                frame_paths: Vec::new(),
            },
        };
        app.handle_model_event(ModelEvent::Result(InferenceResult {
            request,
            output: ModelOutput::failure("boom"),
        }));
        assert_eq!(app.active_request, None);
        assert_eq!(app.status, "m:0 failed: boom");
    }

    #[test]
    fn test_add_instance_selects_it() {
        let mut app = AnnotatorApp::new(AppConfig::default(), None);
        app.new_instance_category = " car ".into();
        app.add_instance();
        let info = app.session.instances.current_instance_info().unwrap();
        assert_eq!(info.instance.instance_name, "instance 1");
        assert_eq!(info.instance.category_name.as_deref(), Some("car"));
    }

    #[test]
    fn test_log_is_bounded() {
        let mut app = AnnotatorApp::new(AppConfig::default(), None);
        for i in 0..(MAX_LOG_LINES + 5) {
            app.push_log(format!("line {i}"));
        }
        assert_eq!(app.log.len(), MAX_LOG_LINES);
        assert_eq!(app.log[0], "line 5");
    }
}
