//! Toolbar, status bar and side panels.

use eframe::egui::{self, Color32};
use samnotator_controllers::InstanceUpdate;
use samnotator_project_model::{InstanceId, Rgb};

use crate::app::AnnotatorApp;

impl AnnotatorApp {
    pub(crate) fn toolbar_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Images");
            ui.add(egui::TextEdit::singleline(&mut self.path_input).desired_width(260.0));
            if ui.button("Open").clicked() {
                self.open_path();
            }

            ui.separator();
            ui.label("Project");
            ui.add(egui::TextEdit::singleline(&mut self.project_input).desired_width(220.0));
            if ui.button("Save").clicked() {
                self.save_project();
            }
            if ui.button("Load").clicked() {
                self.load_project();
            }

            ui.separator();
            if ui.button("◀").on_hover_text("Previous frame (Left)").clicked() {
                self.session.frames.previous_frame();
            }
            if ui.button("▶").on_hover_text("Next frame (Right)").clicked() {
                self.session.frames.next_frame();
            }
            if ui.button("Fit").clicked() {
                self.fit_pending = true;
            }
        });
    }

    fn frame_label(&self) -> String {
        let frames = &self.session.frames;
        let Some(frame_id) = frames.current_frame_id() else {
            return "No frames".to_string();
        };
        let index = frames.index_of(frame_id).map_or(0, |i| i + 1);
        let name = frames
            .frame_path(frame_id)
            .ok()
            .flatten()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        format!("Frame {index}/{} {name}", frames.len())
    }

    pub(crate) fn status_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let xy = match self.hover {
                Some(p) => format!("XY: {p}"),
                None => "XY: -, -".to_string(),
            };
            ui.monospace(xy);
            ui.separator();
            ui.label(self.frame_label());
            ui.separator();
            ui.label(format!(
                "{} points, {} boxes",
                self.session.annotations.point_count(),
                self.session.annotations.bbox_count()
            ));
            ui.separator();
            ui.label(self.status.as_str());
        });
    }

    pub(crate) fn instance_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Instances");
        ui.horizontal(|ui| {
            ui.label("Name");
            ui.text_edit_singleline(&mut self.new_instance_name);
        });
        ui.horizontal(|ui| {
            ui.label("Category");
            ui.text_edit_singleline(&mut self.new_instance_category);
        });
        if ui.button("Add instance").clicked() {
            self.add_instance();
        }
        ui.add_space(4.0);

        let current = self.session.instances.current_instance_id();
        let mut select: Option<InstanceId> = None;
        let mut delete: Option<InstanceId> = None;
        let mut updates: Vec<(InstanceId, InstanceUpdate)> = Vec::new();

        for info in self.session.instances.iter() {
            let instance_id = info.id();
            ui.horizontal(|ui| {
                let mut colour = [info.main_colour.r, info.main_colour.g, info.main_colour.b];
                if ui.color_edit_button_srgb(&mut colour).changed() {
                    updates.push((
                        instance_id,
                        InstanceUpdate {
                            colour: Some(Rgb::new(colour[0], colour[1], colour[2])),
                            ..Default::default()
                        },
                    ));
                }

                let label = match info.instance.category_name.as_deref() {
                    Some(category) => format!("{} ({category})", info.instance.instance_name),
                    None => info.instance.instance_name.clone(),
                };
                if ui.selectable_label(current == Some(instance_id), label).clicked() {
                    select = Some(instance_id);
                }
                if ui.small_button("x").on_hover_text("Delete instance").clicked() {
                    delete = Some(instance_id);
                }
            });

            ui.horizontal(|ui| {
                let mut markers = info.show_markers;
                let mut mask = info.show_mask;
                let mut plain = info.show_plain_mask;
                let mut update = InstanceUpdate::default();
                if ui.checkbox(&mut markers, "Markers").changed() {
                    update.show_markers = Some(markers);
                }
                if ui.checkbox(&mut mask, "Mask").changed() {
                    update.show_mask = Some(mask);
                }
                if ui.checkbox(&mut plain, "Opaque").changed() {
                    update.show_plain_mask = Some(plain);
                }
                ui.colored_label(
                    Color32::GRAY,
                    format!("{} det.", info.instance.detections.len()),
                );
                let touched = update.show_markers.is_some()
                    || update.show_mask.is_some()
                    || update.show_plain_mask.is_some();
                if touched {
                    updates.push((instance_id, update));
                }
            });
        }

        for (instance_id, update) in updates {
            if let Err(e) = self.session.instances.update_instance(instance_id, update) {
                self.status = e.to_string();
            }
        }
        if let Some(instance_id) = select {
            if let Err(e) = self.session.instances.set_current_instance(Some(instance_id)) {
                self.status = e.to_string();
            }
        }
        if let Some(instance_id) = delete {
            match self.session.instances.delete_instance(instance_id) {
                Ok(info) => {
                    self.status = format!("Deleted {}", info.instance.instance_name);
                }
                Err(e) => self.status = e.to_string(),
            }
        }
    }

    pub(crate) fn model_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Model");

        if self.models.is_empty() {
            ui.label("No models configured");
        } else {
            let label = |i: usize| {
                self.models
                    .get(i)
                    .map(|m| format!("[{}] {}", m.kind, m.name))
                    .unwrap_or_default()
            };
            let selected_text = label(self.selected_model);
            let options: Vec<String> = (0..self.models.len()).map(label).collect();
            egui::ComboBox::from_id_source("model")
                .selected_text(selected_text)
                .show_ui(ui, |ui| {
                    for (i, text) in options.into_iter().enumerate() {
                        ui.selectable_value(&mut self.selected_model, i, text);
                    }
                });
        }

        ui.horizontal(|ui| {
            if ui.button("Load").clicked() {
                self.load_selected_model();
            }
            let loaded = self.session.model.has_worker();
            if ui.add_enabled(loaded, egui::Button::new("Unload")).clicked() {
                self.unload_model();
            }
        });
        ui.label(match self.session.model.loaded_model() {
            Some(model) => format!("Loaded: {model}"),
            None => "No model loaded".to_string(),
        });

        ui.checkbox(&mut self.video_options.reverse, "Propagate backwards");

        let idle = self.active_request.is_none();
        ui.horizontal(|ui| {
            if ui.add_enabled(idle, egui::Button::new("Run frame")).clicked() {
                self.run_current_frame();
            }
            if ui.add_enabled(idle, egui::Button::new("Run sequence")).clicked() {
                self.run_sequence();
            }
        });
        if let Some(request_id) = self.active_request.as_deref() {
            ui.add(
                egui::ProgressBar::new(self.progress)
                    .text(format!("{request_id} {:.0}%", self.progress * 100.0)),
            );
        }

        ui.separator();
        ui.label("Log");
        egui::ScrollArea::vertical()
            .id_source("model_log")
            .max_height(180.0)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &self.log {
                    ui.label(egui::RichText::new(line).monospace().small());
                }
            });
    }
}
