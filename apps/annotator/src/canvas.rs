//! Canvas geometry, pointer interactions and overlay painting.

use eframe::egui::{self, Color32, Painter, Pos2, Rect, Stroke, Vec2};
use samnotator_controllers::{AppController, InstanceInfo};
use samnotator_project_model::{
    BBox, BBoxId, FrameId, Mask, PixelXY, Point, PointId, PointKind, Rgb,
};

pub const MIN_ZOOM: f32 = 0.05;
pub const MAX_ZOOM: f32 = 40.0;

/// Zoom factor exponent per scrolled point.
const SCROLL_ZOOM_RATE: f32 = 0.0015;

/// Image-pixel travel below which a press and release count as a click.
const CLICK_SLOP: i32 = 2;

pub const NEEDS_INSTANCE: &str = "Create or select an instance first";

pub fn colour32(rgb: Rgb) -> Color32 {
    Color32::from_rgb(rgb.r, rgb.g, rgb.b)
}

/// Maps image pixels to screen positions inside the canvas rect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasView {
    pub zoom: f32,
    /// Offset of the image origin from the canvas origin, in screen points.
    pub pan: Vec2,
}

impl Default for CanvasView {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl CanvasView {
    pub fn image_rect(&self, canvas: Rect, size: [usize; 2]) -> Rect {
        Rect::from_min_size(
            canvas.min + self.pan,
            Vec2::new(size[0] as f32, size[1] as f32) * self.zoom,
        )
    }

    /// Pixel under a screen position.
    pub fn to_image(&self, canvas: Rect, screen: Pos2) -> PixelXY {
        let p = (screen - canvas.min - self.pan) / self.zoom;
        PixelXY::new(p.x.floor() as i32, p.y.floor() as i32)
    }

    /// Screen position of a pixel's centre.
    pub fn to_screen(&self, canvas: Rect, pixel: PixelXY) -> Pos2 {
        canvas.min + self.pan + Vec2::new(pixel.x as f32 + 0.5, pixel.y as f32 + 0.5) * self.zoom
    }

    /// Zoom by `factor`, keeping the point under `anchor` in place.
    pub fn zoom_at(&mut self, canvas: Rect, anchor: Pos2, factor: f32) {
        let zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let image_pos = (anchor - canvas.min - self.pan) / self.zoom;
        self.pan = anchor - canvas.min - image_pos * zoom;
        self.zoom = zoom;
    }

    pub fn scroll_zoom(&mut self, canvas: Rect, anchor: Pos2, scroll_y: f32) {
        if scroll_y != 0.0 {
            self.zoom_at(canvas, anchor, (scroll_y * SCROLL_ZOOM_RATE).exp());
        }
    }

    /// Fit the whole image into the canvas, centred.
    pub fn fit(&mut self, canvas: Rect, size: [usize; 2]) {
        if size[0] == 0 || size[1] == 0 {
            return;
        }
        let image = Vec2::new(size[0] as f32, size[1] as f32);
        self.zoom = (canvas.width() / image.x)
            .min(canvas.height() / image.y)
            .clamp(MIN_ZOOM, MAX_ZOOM);
        self.pan = (canvas.size() - image * self.zoom) / 2.0;
    }

    /// Marker radius in image pixels, for hit testing.
    pub fn hit_radius(&self, marker_size: u32) -> u32 {
        (marker_size as f32 / 2.0 / self.zoom).ceil() as u32
    }
}

/// A pointer drag in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drag {
    Point { point_id: PointId, target: PixelXY },
    /// Becomes a positive point instead if the pointer barely moves.
    Box { start: PixelXY, end: PixelXY },
    /// Moving the current instance's box; a click still places a point.
    MoveBox {
        bbox_id: BBoxId,
        start: PixelXY,
        end: PixelXY,
    },
}

fn is_click(start: PixelXY, end: PixelXY) -> bool {
    (end.x - start.x).abs() <= CLICK_SLOP && (end.y - start.y).abs() <= CLICK_SLOP
}

/// Selection and drag state of the canvas.
#[derive(Debug, Default)]
pub struct CanvasTool {
    selected: Option<PointId>,
    drag: Option<Drag>,
}

impl CanvasTool {
    pub fn selected(&self) -> Option<PointId> {
        self.selected
    }

    pub fn drag(&self) -> Option<Drag> {
        self.drag
    }

    pub fn cancel(&mut self) {
        self.selected = None;
        self.drag = None;
    }

    /// Drop a selection or drag whose point no longer exists.
    pub fn sync(&mut self, app: &AppController) {
        let current = app.frames.current_frame_id();
        let alive = |id: PointId| {
            app.annotations
                .point(id)
                .is_some_and(|pa| Some(pa.frame_id) == current)
        };
        if self.selected.is_some_and(|id| !alive(id)) {
            self.selected = None;
        }
        if let Some(Drag::Point { point_id, .. }) = self.drag {
            if !alive(point_id) {
                self.drag = None;
            }
        }
    }

    /// Left button down: grab the point under the pointer, grab the current
    /// instance's box, or start a new box.
    pub fn primary_pressed(&mut self, app: &AppController, position: PixelXY, radius: u32) {
        let Some(frame_id) = app.frames.current_frame_id() else {
            return;
        };
        if let Some(point_id) = app.annotations.hit_test(frame_id, position, radius) {
            self.selected = Some(point_id);
            self.drag = Some(Drag::Point {
                point_id,
                target: position,
            });
            return;
        }

        let own_box = app
            .instances
            .current_instance_id()
            .and_then(|id| app.annotations.bbox_for_instance(id))
            .filter(|bba| bba.frame_id == frame_id && bba.bbox.contains(position));
        self.drag = Some(match own_box {
            Some(bba) => Drag::MoveBox {
                bbox_id: bba.bbox_id,
                start: position,
                end: position,
            },
            None => Drag::Box {
                start: position,
                end: position,
            },
        });
    }

    pub fn pointer_moved(&mut self, position: PixelXY) {
        match &mut self.drag {
            Some(Drag::Point { target, .. }) => *target = position,
            Some(Drag::Box { end, .. }) | Some(Drag::MoveBox { end, .. }) => *end = position,
            None => {}
        }
    }

    /// Left button up: finish the drag. Returns a hint when nothing could be
    /// placed.
    pub fn primary_released(
        &mut self,
        app: &mut AppController,
        position: PixelXY,
    ) -> Option<&'static str> {
        match self.drag.take()? {
            Drag::Point { point_id, .. } => {
                app.annotations.update_point_move(point_id, position);
                None
            }
            Drag::MoveBox { bbox_id, start, .. } if !is_click(start, position) => {
                if let Some(bba) = app.annotations.bbox(bbox_id).copied() {
                    let moved = bba
                        .bbox
                        .translated(position.x - start.x, position.y - start.y);
                    app.annotations.update_move_bbox(bbox_id, moved);
                }
                None
            }
            Drag::MoveBox { start, .. } | Drag::Box { start, .. } => {
                if app.instances.current_instance_id().is_none() {
                    return Some(NEEDS_INSTANCE);
                }
                if is_click(start, position) {
                    let point = Point::new(start, PointKind::Positive);
                    if let Some(pa) = app.request_point_annotation(point) {
                        self.selected = Some(pa.point_id);
                    }
                } else {
                    app.request_bbox_annotation(BBox::from_corners(
                        start,
                        position,
                        PointKind::Positive,
                    ));
                }
                None
            }
        }
    }

    /// Right button down: select the point under the pointer or add a
    /// negative one.
    pub fn secondary_pressed(
        &mut self,
        app: &mut AppController,
        position: PixelXY,
        radius: u32,
    ) -> Option<&'static str> {
        let frame_id = app.frames.current_frame_id()?;
        if let Some(point_id) = app.annotations.hit_test(frame_id, position, radius) {
            self.selected = Some(point_id);
            return None;
        }
        if app.instances.current_instance_id().is_none() {
            return Some(NEEDS_INSTANCE);
        }
        if let Some(pa) = app.request_point_annotation(Point::new(position, PointKind::Negative)) {
            self.selected = Some(pa.point_id);
        }
        None
    }

    pub fn delete_selected(&mut self, app: &mut AppController) -> bool {
        let Some(point_id) = self.selected.take() else {
            return false;
        };
        self.drag = None;
        app.annotations.delete_point(point_id).is_some()
    }

    pub fn toggle_selected(&mut self, app: &mut AppController) -> bool {
        self.selected
            .and_then(|point_id| app.annotations.update_point_kind(point_id, None))
            .is_some()
    }
}

/// Coloured overlay for a detection mask.
pub fn mask_image(mask: &Mask, colour: Rgb, opacity: f32) -> egui::ColorImage {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    let fill = Color32::from_rgba_unmultiplied(colour.r, colour.g, colour.b, alpha);
    let pixels = mask
        .as_slice()
        .iter()
        .map(|&set| if set { fill } else { Color32::TRANSPARENT })
        .collect();
    egui::ColorImage {
        size: [mask.width() as usize, mask.height() as usize],
        pixels,
    }
}

fn draw_marker(painter: &Painter, centre: Pos2, info: &InstanceInfo, kind: PointKind, selected: bool) {
    let radius = info.marker_size as f32 / 2.0;
    let contrast = colour32(info.contrast_colour);
    painter.circle(centre, radius, colour32(info.main_colour), Stroke::new(1.5, contrast));

    let arm = radius * 0.55;
    let stroke = Stroke::new(2.0, contrast);
    painter.line_segment([centre - Vec2::X * arm, centre + Vec2::X * arm], stroke);
    if kind.is_positive() {
        painter.line_segment([centre - Vec2::Y * arm, centre + Vec2::Y * arm], stroke);
    }
    if selected {
        painter.circle_stroke(centre, radius + 3.0, Stroke::new(2.0, Color32::WHITE));
    }
}

fn draw_bbox(painter: &Painter, rect: Rect, info: &InstanceInfo, kind: PointKind) {
    let main = colour32(info.main_colour);
    let width = if kind.is_positive() { 2.0 } else { 1.0 };
    painter.rect_stroke(rect, 0.0, Stroke::new(width, main));

    let handle = Vec2::splat(info.bbox_handle_size as f32);
    for corner in [rect.left_top(), rect.right_top(), rect.left_bottom(), rect.right_bottom()] {
        painter.rect_filled(Rect::from_center_size(corner, handle), 0.0, main);
    }
}

/// Points, boxes and the drag preview of `frame_id`.
pub fn paint_annotations(
    painter: &Painter,
    view: &CanvasView,
    canvas: Rect,
    app: &AppController,
    frame_id: FrameId,
    tool: &CanvasTool,
) {
    let box_rect = |a: PixelXY, b: PixelXY| {
        Rect::from_two_pos(
            view.to_screen(canvas, a) - Vec2::splat(view.zoom / 2.0),
            view.to_screen(canvas, b) + Vec2::splat(view.zoom / 2.0),
        )
    };

    let drag = tool.drag();
    for bba in app.annotations.bboxes_for_frame(frame_id) {
        let Some(info) = app.instances.get(bba.instance_id) else {
            continue;
        };
        if !info.show_markers {
            continue;
        }
        let bbox = match drag {
            Some(Drag::MoveBox { bbox_id, start, end }) if bbox_id == bba.bbox_id => {
                bba.bbox.translated(end.x - start.x, end.y - start.y)
            }
            _ => bba.bbox,
        };
        draw_bbox(painter, box_rect(bbox.top_left, bbox.bottom_right), info, bbox.kind);
    }

    for pa in app.annotations.points_for_frame(frame_id) {
        let Some(info) = app.instances.get(pa.instance_id) else {
            continue;
        };
        if !info.show_markers {
            continue;
        }
        let position = match drag {
            Some(Drag::Point { point_id, target }) if point_id == pa.point_id => {
                if !app.annotations.point_can_move(point_id, frame_id, target) {
                    painter.circle_stroke(
                        view.to_screen(canvas, target),
                        info.marker_size as f32 / 2.0,
                        Stroke::new(2.0, Color32::RED),
                    );
                }
                target
            }
            _ => pa.point.position,
        };
        draw_marker(
            painter,
            view.to_screen(canvas, position),
            info,
            pa.point.kind,
            tool.selected() == Some(pa.point_id),
        );
    }

    if let Some(Drag::Box { start, end }) = drag {
        if start != end {
            let colour = app
                .instances
                .current_instance_info()
                .map_or(Color32::WHITE, |info| colour32(info.main_colour));
            painter.rect_stroke(box_rect(start.min(end), start.max(end)), 0.0, Stroke::new(1.0, colour));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samnotator_common::AppConfig;
    use samnotator_project_model::InstanceId;
    use std::path::PathBuf;

    fn canvas() -> Rect {
        Rect::from_min_size(Pos2::new(100.0, 50.0), Vec2::new(400.0, 300.0))
    }

    fn session(name: &str) -> (PathBuf, AppController, InstanceId) {
        let dir = std::env::temp_dir().join(format!("samnotator_canvas_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..2 {
            image::RgbImage::new(40, 30)
                .save(dir.join(format!("f{i}.png")))
                .unwrap();
        }
        let mut app = AppController::new(&AppConfig::default());
        app.open_path(&dir).unwrap();
        let id = app.create_instance("obj", None, None);
        app.instances.set_current_instance(Some(id)).unwrap();
        app.process_events();
        (dir, app, id)
    }

    #[test]
    fn test_view_maps_pixels_both_ways() {
        let mut view = CanvasView::default();
        view.zoom = 4.0;
        view.pan = Vec2::new(10.0, 20.0);

        let pixel = PixelXY::new(7, 3);
        let screen = view.to_screen(canvas(), pixel);
        assert_eq!(screen, Pos2::new(100.0 + 10.0 + 30.0, 50.0 + 20.0 + 14.0));
        assert_eq!(view.to_image(canvas(), screen), pixel);
        assert_eq!(view.to_image(canvas(), Pos2::new(109.0, 69.0)), PixelXY::new(-1, -1));
    }

    #[test]
    fn test_zoom_keeps_anchor_pixel() {
        let mut view = CanvasView::default();
        let anchor = Pos2::new(260.0, 170.0);
        let before = view.to_image(canvas(), anchor);

        view.zoom_at(canvas(), anchor, 3.0);
        assert_eq!(view.zoom, 3.0);
        assert_eq!(view.to_image(canvas(), anchor), before);

        view.zoom_at(canvas(), anchor, 1000.0);
        assert_eq!(view.zoom, MAX_ZOOM);
    }

    #[test]
    fn test_fit_centres_image() {
        let mut view = CanvasView::default();
        view.fit(canvas(), [200, 50]);
        assert_eq!(view.zoom, 2.0);
        let rect = view.image_rect(canvas(), [200, 50]);
        assert_eq!(rect.center(), canvas().center());
    }

    #[test]
    fn test_click_adds_positive_point_and_drag_adds_box() {
        let (dir, mut app, id) = session("click");
        let mut tool = CanvasTool::default();

        tool.primary_pressed(&app, PixelXY::new(5, 5), 2);
        tool.pointer_moved(PixelXY::new(6, 5));
        assert_eq!(tool.primary_released(&mut app, PixelXY::new(6, 5)), None);
        let points = app.annotations.points_for_instance(id);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].point.position, PixelXY::new(5, 5));
        assert_eq!(points[0].point.kind, PointKind::Positive);
        assert_eq!(tool.selected(), Some(points[0].point_id));

        tool.primary_pressed(&app, PixelXY::new(20, 20), 2);
        tool.pointer_moved(PixelXY::new(10, 12));
        tool.primary_released(&mut app, PixelXY::new(10, 12));
        let bbox = app.annotations.bbox_for_instance(id).unwrap().bbox;
        assert_eq!(bbox.top_left, PixelXY::new(10, 12));
        assert_eq!(bbox.bottom_right, PixelXY::new(20, 20));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_drag_moves_point_unless_target_taken() {
        let (dir, mut app, id) = session("drag");
        let frame = app.frames.current_frame_id().unwrap();
        let a = app.request_point_annotation(Point::positive(5, 5)).unwrap();
        app.request_point_annotation(Point::positive(15, 5)).unwrap();
        let mut tool = CanvasTool::default();

        tool.primary_pressed(&app, PixelXY::new(6, 6), 2);
        assert_eq!(tool.selected(), Some(a.point_id));
        tool.pointer_moved(PixelXY::new(15, 5));
        tool.primary_released(&mut app, PixelXY::new(15, 5));
        assert_eq!(
            app.annotations.point(a.point_id).unwrap().point.position,
            PixelXY::new(5, 5)
        );

        tool.primary_pressed(&app, PixelXY::new(5, 5), 2);
        tool.primary_released(&mut app, PixelXY::new(9, 9));
        assert_eq!(
            app.annotations.point(a.point_id).unwrap().point.position,
            PixelXY::new(9, 9)
        );
        assert_eq!(app.annotations.points_for_frame(frame).len(), 2);
        assert!(app.annotations.bbox_for_instance(id).is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_dragging_inside_own_box_moves_it() {
        let (dir, mut app, id) = session("movebox");
        app.request_bbox_annotation(BBox::from_corners(
            PixelXY::new(2, 2),
            PixelXY::new(12, 10),
            PointKind::Positive,
        ))
        .unwrap();
        let mut tool = CanvasTool::default();

        tool.primary_pressed(&app, PixelXY::new(5, 5), 1);
        assert!(matches!(tool.drag(), Some(Drag::MoveBox { .. })));
        tool.primary_released(&mut app, PixelXY::new(10, 8));
        let bbox = app.annotations.bbox_for_instance(id).unwrap().bbox;
        assert_eq!(bbox.top_left, PixelXY::new(7, 5));
        assert_eq!(bbox.bottom_right, PixelXY::new(17, 13));

        // A click inside the box still places a point.
        tool.primary_pressed(&app, PixelXY::new(9, 9), 1);
        tool.primary_released(&mut app, PixelXY::new(9, 9));
        assert_eq!(app.annotations.points_for_instance(id).len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_right_click_delete_and_toggle() {
        let (dir, mut app, id) = session("keys");
        let mut tool = CanvasTool::default();

        assert_eq!(tool.secondary_pressed(&mut app, PixelXY::new(3, 4), 2), None);
        let point_id = tool.selected().unwrap();
        assert_eq!(
            app.annotations.point(point_id).unwrap().point.kind,
            PointKind::Negative
        );

        assert!(tool.toggle_selected(&mut app));
        assert_eq!(
            app.annotations.point(point_id).unwrap().point.kind,
            PointKind::Positive
        );

        assert!(tool.delete_selected(&mut app));
        assert!(app.annotations.points_for_instance(id).is_empty());
        assert!(!tool.delete_selected(&mut app));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_no_instance_gives_hint() {
        let (dir, mut app, _) = session("hint");
        app.instances.set_current_instance(None).unwrap();
        let mut tool = CanvasTool::default();

        tool.primary_pressed(&app, PixelXY::new(5, 5), 2);
        assert_eq!(
            tool.primary_released(&mut app, PixelXY::new(5, 5)),
            Some(NEEDS_INSTANCE)
        );
        assert_eq!(
            tool.secondary_pressed(&mut app, PixelXY::new(5, 5), 2),
            Some(NEEDS_INSTANCE)
        );
        assert_eq!(app.annotations.point_count(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_selection_cleared_on_frame_change() {
        let (dir, mut app, _) = session("sync");
        let mut tool = CanvasTool::default();
        tool.secondary_pressed(&mut app, PixelXY::new(3, 4), 2);
        assert!(tool.selected().is_some());

        app.frames.next_frame();
        tool.sync(&app);
        assert_eq!(tool.selected(), None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mask_image_colours_set_pixels() {
        let mask = Mask::from_fn(3, 2, |x, y| x == 1 && y == 0);
        let image = mask_image(&mask, Rgb::new(255, 0, 0), 1.0);
        assert_eq!(image.size, [3, 2]);
        assert_eq!(image.pixels[1], Color32::from_rgb(255, 0, 0));
        assert_eq!(image.pixels[0], Color32::TRANSPARENT);
        assert_eq!(image.pixels[4], Color32::TRANSPARENT);
    }
}
