//! Point and box annotations.
//!
//! Points are unique per pixel on a frame: two points can never share a
//! position. Boxes are limited to one per instance. Points and boxes draw
//! their ids from the same counter.

use std::collections::{BTreeMap, BTreeSet};

use samnotator_project_model::{
    BBox, BBoxAnnotation, BBoxId, Change, FrameId, InstanceId, PixelXY, Point, PointAnnotation,
    PointId, PointKind,
};

use crate::events::{ControllerEvent, EventQueue};

/// Occupied pixels of one frame, in creation order.
#[derive(Debug, Default, Clone)]
struct FrameOccupancy {
    slots: Vec<(PixelXY, PointId)>,
}

impl FrameOccupancy {
    fn owner(&self, position: PixelXY) -> Option<PointId> {
        self.slots
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, id)| *id)
    }

    fn is_free(&self, position: PixelXY) -> bool {
        self.owner(position).is_none()
    }

    fn insert(&mut self, position: PixelXY, point_id: PointId) {
        self.slots.push((position, point_id));
    }

    fn remove(&mut self, point_id: PointId) {
        self.slots.retain(|(_, id)| *id != point_id);
    }

    fn relocate(&mut self, point_id: PointId, position: PixelXY) {
        if let Some(slot) = self.slots.iter_mut().find(|(_, id)| *id == point_id) {
            slot.0 = position;
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Owns every point and box annotation of the session.
#[derive(Debug, Default)]
pub struct AnnotationController {
    per_frame: BTreeMap<FrameId, FrameOccupancy>,
    points: BTreeMap<PointId, PointAnnotation>,
    bboxes: BTreeMap<BBoxId, BBoxAnnotation>,
    next_id: u32,
    events: EventQueue,
}

impl AnnotationController {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Drop everything and restart ids from zero.
    pub fn reset(&mut self) {
        let points: Vec<PointAnnotation> = std::mem::take(&mut self.points).into_values().collect();
        let bboxes: Vec<BBoxAnnotation> = std::mem::take(&mut self.bboxes).into_values().collect();
        self.per_frame.clear();
        self.next_id = 0;
        if !points.is_empty() {
            self.events
                .push(ControllerEvent::PointsChanged(points, Change::Delete));
        }
        if !bboxes.is_empty() {
            self.events
                .push(ControllerEvent::BBoxesChanged(bboxes, Change::Delete));
        }
    }

    // --- Points ---

    /// Add a point. Returns `None` if the pixel is already taken on that frame.
    pub fn create_point(
        &mut self,
        frame_id: FrameId,
        instance_id: InstanceId,
        point: Point,
    ) -> Option<PointAnnotation> {
        if !self
            .per_frame
            .get(&frame_id)
            .map_or(true, |f| f.is_free(point.position))
        {
            tracing::debug!(%frame_id, position = %point.position, "Pixel already annotated");
            return None;
        }

        let annotation = PointAnnotation {
            point_id: PointId(self.next_id()),
            frame_id,
            instance_id,
            point,
        };
        self.store_point(annotation);
        self.events
            .push(ControllerEvent::PointsChanged(vec![annotation], Change::Create));
        Some(annotation)
    }

    fn store_point(&mut self, annotation: PointAnnotation) {
        self.per_frame
            .entry(annotation.frame_id)
            .or_default()
            .insert(annotation.point.position, annotation.point_id);
        self.points.insert(annotation.point_id, annotation);
    }

    /// Re-insert a point with its original id, e.g. from a project file.
    /// Returns `false` if the id or the pixel is already in use.
    pub fn restore_point(&mut self, annotation: PointAnnotation) -> bool {
        let taken = self.points.contains_key(&annotation.point_id)
            || self
                .per_frame
                .get(&annotation.frame_id)
                .is_some_and(|f| !f.is_free(annotation.point.position));
        if taken {
            return false;
        }
        self.next_id = self.next_id.max(annotation.point_id.0 + 1);
        self.store_point(annotation);
        self.events
            .push(ControllerEvent::PointsChanged(vec![annotation], Change::Create));
        true
    }

    /// Delete points by id, ignoring unknown ids.
    pub fn delete_point_list(&mut self, point_ids: &[PointId]) -> Vec<PointAnnotation> {
        let mut deleted = Vec::new();
        for point_id in point_ids {
            let Some(annotation) = self.points.remove(point_id) else {
                continue;
            };
            if let Some(frame) = self.per_frame.get_mut(&annotation.frame_id) {
                frame.remove(annotation.point_id);
                if frame.len() == 0 {
                    self.per_frame.remove(&annotation.frame_id);
                }
            }
            deleted.push(annotation);
        }
        if !deleted.is_empty() {
            self.events
                .push(ControllerEvent::PointsChanged(deleted.clone(), Change::Delete));
        }
        deleted
    }

    pub fn delete_point(&mut self, point_id: PointId) -> Option<PointAnnotation> {
        self.delete_point_list(&[point_id]).pop()
    }

    /// Move a point. Returns the annotation as it stands afterwards, which is
    /// unchanged when the target is its own pixel or is taken by another point.
    pub fn update_point_move(
        &mut self,
        point_id: PointId,
        position: PixelXY,
    ) -> Option<PointAnnotation> {
        let annotation = *self.points.get(&point_id)?;
        if annotation.point.position == position {
            return Some(annotation);
        }

        let frame = self.per_frame.entry(annotation.frame_id).or_default();
        if let Some(owner) = frame.owner(position) {
            tracing::debug!(%point_id, %owner, %position, "Move refused, pixel taken");
            return Some(annotation);
        }
        frame.relocate(point_id, position);

        let moved = annotation.with_position(position);
        self.points.insert(point_id, moved);
        self.events
            .push(ControllerEvent::PointsChanged(vec![moved], Change::Update));
        Some(moved)
    }

    /// Set the kind of a point, or toggle it when `kind` is `None`.
    pub fn update_point_kind(
        &mut self,
        point_id: PointId,
        kind: Option<PointKind>,
    ) -> Option<PointAnnotation> {
        let annotation = *self.points.get(&point_id)?;
        let kind = kind.unwrap_or_else(|| annotation.point.kind.toggled());
        if kind == annotation.point.kind {
            return Some(annotation);
        }

        let updated = annotation.with_kind(kind);
        self.points.insert(point_id, updated);
        self.events
            .push(ControllerEvent::PointsChanged(vec![updated], Change::Update));
        Some(updated)
    }

    // --- Boxes ---

    /// Add a box, replacing the instance's previous one.
    pub fn create_bbox(
        &mut self,
        frame_id: FrameId,
        instance_id: InstanceId,
        bbox: BBox,
    ) -> BBoxAnnotation {
        if let Some(existing) = self.bbox_for_instance(instance_id) {
            tracing::warn!(
                %instance_id,
                bbox_id = %existing.bbox_id,
                "Instance already has a box, replacing it"
            );
            self.delete_bbox(existing.bbox_id);
        }

        let annotation = BBoxAnnotation {
            bbox_id: BBoxId(self.next_id()),
            frame_id,
            instance_id,
            bbox,
        };
        self.bboxes.insert(annotation.bbox_id, annotation);
        self.events
            .push(ControllerEvent::BBoxesChanged(vec![annotation], Change::Create));
        annotation
    }

    /// Re-insert a box with its original id. Returns `false` if the id is in use.
    pub fn restore_bbox(&mut self, annotation: BBoxAnnotation) -> bool {
        if self.bboxes.contains_key(&annotation.bbox_id) {
            return false;
        }
        self.next_id = self.next_id.max(annotation.bbox_id.0 + 1);
        self.bboxes.insert(annotation.bbox_id, annotation);
        self.events
            .push(ControllerEvent::BBoxesChanged(vec![annotation], Change::Create));
        true
    }

    pub fn delete_bbox_list(&mut self, bbox_ids: &[BBoxId]) -> Vec<BBoxAnnotation> {
        let deleted: Vec<BBoxAnnotation> = bbox_ids
            .iter()
            .filter_map(|id| self.bboxes.remove(id))
            .collect();
        if !deleted.is_empty() {
            self.events
                .push(ControllerEvent::BBoxesChanged(deleted.clone(), Change::Delete));
        }
        deleted
    }

    pub fn delete_bbox(&mut self, bbox_id: BBoxId) -> Option<BBoxAnnotation> {
        self.delete_bbox_list(&[bbox_id]).pop()
    }

    /// Replace the geometry of a box.
    pub fn update_move_bbox(&mut self, bbox_id: BBoxId, bbox: BBox) -> Option<BBoxAnnotation> {
        let annotation = self.bboxes.get_mut(&bbox_id)?;
        if annotation.bbox == bbox {
            return Some(*annotation);
        }
        annotation.bbox = bbox;
        let updated = *annotation;
        self.events
            .push(ControllerEvent::BBoxesChanged(vec![updated], Change::Update));
        Some(updated)
    }

    // --- Queries ---

    pub fn point(&self, point_id: PointId) -> Option<&PointAnnotation> {
        self.points.get(&point_id)
    }

    pub fn points_for_instance(&self, instance_id: InstanceId) -> Vec<PointAnnotation> {
        self.points
            .values()
            .filter(|pa| pa.instance_id == instance_id)
            .copied()
            .collect()
    }

    /// Points of a frame, in creation order.
    pub fn points_for_frame(&self, frame_id: FrameId) -> Vec<PointAnnotation> {
        let Some(frame) = self.per_frame.get(&frame_id) else {
            return Vec::new();
        };
        frame
            .slots
            .iter()
            .filter_map(|(_, id)| self.points.get(id).copied())
            .collect()
    }

    /// Whether `point_id` may be placed at `position` on `frame_id`.
    pub fn point_can_move(&self, point_id: PointId, frame_id: FrameId, position: PixelXY) -> bool {
        self.per_frame
            .get(&frame_id)
            .and_then(|f| f.owner(position))
            .map_or(true, |owner| owner == point_id)
    }

    pub fn bbox(&self, bbox_id: BBoxId) -> Option<&BBoxAnnotation> {
        self.bboxes.get(&bbox_id)
    }

    pub fn bbox_for_instance(&self, instance_id: InstanceId) -> Option<BBoxAnnotation> {
        self.bboxes
            .values()
            .find(|ba| ba.instance_id == instance_id)
            .copied()
    }

    pub fn bboxes_for_frame(&self, frame_id: FrameId) -> Vec<BBoxAnnotation> {
        self.bboxes
            .values()
            .filter(|ba| ba.frame_id == frame_id)
            .copied()
            .collect()
    }

    /// Frames holding at least one point or box, ascending.
    pub fn frames_with_annotations(&self) -> Vec<FrameId> {
        self.per_frame
            .keys()
            .copied()
            .chain(self.bboxes.values().map(|ba| ba.frame_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn bbox_count(&self) -> usize {
        self.bboxes.len()
    }

    /// Closest point to `position` on `frame_id` within `radius` pixels.
    pub fn hit_test(&self, frame_id: FrameId, position: PixelXY, radius: u32) -> Option<PointId> {
        let r2 = radius as i64 * radius as i64;
        self.per_frame
            .get(&frame_id)?
            .slots
            .iter()
            .map(|(p, id)| (p.distance_sq(&position), *id))
            .filter(|(d, _)| *d <= r2)
            .min_by_key(|(d, _)| *d)
            .map(|(_, id)| id)
    }

    /// Most recent box on `frame_id` containing `position`.
    pub fn bbox_at(&self, frame_id: FrameId, position: PixelXY) -> Option<BBoxId> {
        self.bboxes
            .values()
            .rev()
            .find(|ba| ba.frame_id == frame_id && ba.bbox.contains(position))
            .map(|ba| ba.bbox_id)
    }

    // --- Bulk ---

    /// Delete every point and box of an instance.
    pub fn delete_instance(&mut self, instance_id: InstanceId) {
        let point_ids: Vec<PointId> = self
            .points
            .values()
            .filter(|pa| pa.instance_id == instance_id)
            .map(|pa| pa.point_id)
            .collect();
        self.delete_point_list(&point_ids);

        let bbox_ids: Vec<BBoxId> = self
            .bboxes
            .values()
            .filter(|ba| ba.instance_id == instance_id)
            .map(|ba| ba.bbox_id)
            .collect();
        self.delete_bbox_list(&bbox_ids);
    }

    /// Delete every point and box on a frame.
    pub fn delete_frame(&mut self, frame_id: FrameId) {
        let point_ids: Vec<PointId> = self
            .points_for_frame(frame_id)
            .iter()
            .map(|pa| pa.point_id)
            .collect();
        self.delete_point_list(&point_ids);

        let bbox_ids: Vec<BBoxId> = self
            .bboxes_for_frame(frame_id)
            .iter()
            .map(|ba| ba.bbox_id)
            .collect();
        self.delete_bbox_list(&bbox_ids);
    }

    /// Take pending events.
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        self.events.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const F0: FrameId = FrameId(0);
    const F1: FrameId = FrameId(1);
    const I0: InstanceId = InstanceId(0);
    const I1: InstanceId = InstanceId(1);

    fn positive_box(x0: i32, y0: i32, x1: i32, y1: i32) -> BBox {
        BBox::from_corners(PixelXY::new(x0, y0), PixelXY::new(x1, y1), PointKind::Positive)
    }

    #[test]
    fn test_one_point_per_pixel() {
        let mut ann = AnnotationController::new();
        let a = ann.create_point(F0, I0, Point::positive(5, 5)).unwrap();
        assert!(ann.create_point(F0, I1, Point::negative(5, 5)).is_none());
        let b = ann.create_point(F1, I1, Point::negative(5, 5)).unwrap();
        assert_eq!((a.point_id, b.point_id), (PointId(0), PointId(1)));
    }

    #[test]
    fn test_points_and_boxes_share_ids() {
        let mut ann = AnnotationController::new();
        ann.create_point(F0, I0, Point::positive(1, 1));
        let b = ann.create_bbox(F0, I0, positive_box(0, 0, 4, 4));
        let p = ann.create_point(F0, I0, Point::positive(2, 2)).unwrap();
        assert_eq!(b.bbox_id, BBoxId(1));
        assert_eq!(p.point_id, PointId(2));
    }

    #[test]
    fn test_move_rules() {
        let mut ann = AnnotationController::new();
        let a = ann.create_point(F0, I0, Point::positive(1, 1)).unwrap();
        let b = ann.create_point(F0, I0, Point::positive(3, 3)).unwrap();
        ann.drain_events();

        // Onto itself: no change, no event.
        assert_eq!(ann.update_point_move(a.point_id, PixelXY::new(1, 1)), Some(a));
        // Onto another point: refused.
        assert_eq!(ann.update_point_move(a.point_id, PixelXY::new(3, 3)), Some(a));
        assert!(ann.drain_events().is_empty());
        assert!(!ann.point_can_move(a.point_id, F0, b.point.position));
        assert!(ann.point_can_move(a.point_id, F0, PixelXY::new(1, 1)));

        let moved = ann.update_point_move(a.point_id, PixelXY::new(7, 8)).unwrap();
        assert_eq!(moved.point.position, PixelXY::new(7, 8));
        assert!(ann.create_point(F0, I1, Point::positive(1, 1)).is_some());
        assert!(ann.create_point(F0, I1, Point::positive(7, 8)).is_none());

        assert_eq!(ann.update_point_move(PointId(99), PixelXY::new(0, 0)), None);
    }

    #[test]
    fn test_kind_toggle_and_noop() {
        let mut ann = AnnotationController::new();
        let a = ann.create_point(F0, I0, Point::positive(1, 1)).unwrap();
        ann.drain_events();

        let toggled = ann.update_point_kind(a.point_id, None).unwrap();
        assert_eq!(toggled.point.kind, PointKind::Negative);
        let same = ann
            .update_point_kind(a.point_id, Some(PointKind::Negative))
            .unwrap();
        assert_eq!(same, toggled);
        assert_eq!(ann.drain_events().len(), 1);
    }

    #[test]
    fn test_delete_list_ignores_unknown_and_drops_empty_frames() {
        let mut ann = AnnotationController::new();
        let a = ann.create_point(F1, I0, Point::positive(1, 1)).unwrap();
        ann.drain_events();

        let deleted = ann.delete_point_list(&[PointId(42), a.point_id]);
        assert_eq!(deleted, vec![a]);
        assert!(ann.frames_with_annotations().is_empty());
        assert_eq!(
            ann.drain_events(),
            vec![ControllerEvent::PointsChanged(vec![a], Change::Delete)]
        );

        assert!(ann.delete_point_list(&[a.point_id]).is_empty());
        assert!(ann.drain_events().is_empty());
    }

    #[test]
    fn test_second_box_replaces_first() {
        let mut ann = AnnotationController::new();
        let first = ann.create_bbox(F0, I0, positive_box(0, 0, 5, 5));
        let second = ann.create_bbox(F1, I0, positive_box(1, 1, 6, 6));
        assert!(ann.bbox(first.bbox_id).is_none());
        assert_eq!(ann.bbox_for_instance(I0), Some(second));
        assert_eq!(ann.bbox_count(), 1);

        let events = ann.drain_events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            ControllerEvent::BBoxesChanged(vec![first], Change::Delete)
        );
    }

    #[test]
    fn test_frames_with_annotations_and_bulk_deletes() {
        let mut ann = AnnotationController::new();
        ann.create_point(FrameId(4), I0, Point::positive(1, 1));
        ann.create_point(FrameId(2), I1, Point::positive(1, 1));
        ann.create_bbox(FrameId(7), I1, positive_box(0, 0, 2, 2));
        assert_eq!(
            ann.frames_with_annotations(),
            vec![FrameId(2), FrameId(4), FrameId(7)]
        );

        ann.delete_instance(I1);
        assert_eq!(ann.frames_with_annotations(), vec![FrameId(4)]);

        ann.delete_frame(FrameId(4));
        assert!(ann.frames_with_annotations().is_empty());
    }

    #[test]
    fn test_hit_test_picks_nearest() {
        let mut ann = AnnotationController::new();
        let a = ann.create_point(F0, I0, Point::positive(10, 10)).unwrap();
        let b = ann.create_point(F0, I0, Point::positive(14, 10)).unwrap();
        assert_eq!(ann.hit_test(F0, PixelXY::new(11, 10), 5), Some(a.point_id));
        assert_eq!(ann.hit_test(F0, PixelXY::new(13, 11), 5), Some(b.point_id));
        assert_eq!(ann.hit_test(F0, PixelXY::new(30, 30), 5), None);
        assert_eq!(ann.hit_test(F1, PixelXY::new(10, 10), 5), None);
    }

    #[test]
    fn test_reset_emits_single_delete() {
        let mut ann = AnnotationController::new();
        ann.create_point(F0, I0, Point::positive(1, 1));
        ann.create_point(F1, I0, Point::positive(1, 1));
        ann.drain_events();

        ann.reset();
        let events = ann.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ControllerEvent::PointsChanged(points, Change::Delete) if points.len() == 2
        ));
        let p = ann.create_point(F0, I0, Point::positive(1, 1)).unwrap();
        assert_eq!(p.point_id, PointId(0));
    }

    #[test]
    fn test_reset_with_boxes_emits_point_then_box_delete() {
        let mut ann = AnnotationController::new();
        ann.create_point(F0, I0, Point::positive(1, 1));
        ann.create_bbox(F1, I1, positive_box(0, 0, 3, 3));
        ann.drain_events();

        ann.reset();
        let events = ann.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ControllerEvent::PointsChanged(points, Change::Delete) if points.len() == 1
        ));
        assert!(matches!(
            &events[1],
            ControllerEvent::BBoxesChanged(bboxes, Change::Delete) if bboxes.len() == 1
        ));
        assert!(ann.frames_with_annotations().is_empty());
    }

    #[test]
    fn test_restore_keeps_ids() {
        let mut ann = AnnotationController::new();
        let restored = PointAnnotation {
            point_id: PointId(10),
            frame_id: F0,
            instance_id: I0,
            point: Point::positive(3, 3),
        };
        assert!(ann.restore_point(restored));
        assert!(!ann.restore_point(restored));
        let next = ann.create_point(F0, I0, Point::positive(4, 4)).unwrap();
        assert_eq!(next.point_id, PointId(11));
    }

    proptest! {
        #[test]
        fn prop_no_two_points_share_a_pixel(
            ops in prop::collection::vec((0u32..3, 0i32..4, 0i32..4, 0u8..3), 1..60)
        ) {
            let mut ann = AnnotationController::new();
            for (frame, x, y, op) in ops {
                let frame_id = FrameId(frame);
                let position = PixelXY::new(x, y);
                match op {
                    0 => {
                        ann.create_point(frame_id, I0, Point::positive(x, y));
                    }
                    1 => {
                        if let Some(first) = ann.points_for_frame(frame_id).first() {
                            ann.update_point_move(first.point_id, position);
                        }
                    }
                    _ => {
                        if let Some(id) = ann.hit_test(frame_id, position, 1) {
                            ann.delete_point(id);
                        }
                    }
                }

                for frame in ann.frames_with_annotations() {
                    let points = ann.points_for_frame(frame);
                    let mut seen = std::collections::HashSet::new();
                    for pa in &points {
                        prop_assert!(seen.insert(pa.point.position));
                    }
                }
            }
        }
    }
}
